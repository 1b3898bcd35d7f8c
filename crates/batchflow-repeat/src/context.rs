// Copyright 2025 DataStax Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// Shared context for one repeat loop.
///
/// Handed to every iteration (possibly on different worker tasks), so all
/// state is interior-mutable: atomic counters/flags plus an attribute map
/// for policy and handler bookkeeping. Nested repeat loops link to their
/// parent context.
#[derive(Debug, Default)]
pub struct RepeatContext {
    parent: Option<Arc<RepeatContext>>,
    started_count: AtomicUsize,
    complete_only: AtomicBool,
    terminate_only: AtomicBool,
    attributes: RwLock<HashMap<String, Value>>,
}

impl RepeatContext {
    pub fn new(parent: Option<Arc<RepeatContext>>) -> Self {
        Self {
            parent,
            ..Self::default()
        }
    }

    pub fn parent(&self) -> Option<&Arc<RepeatContext>> {
        self.parent.as_ref()
    }

    /// Record the start of an iteration; returns the new count.
    pub fn increment(&self) -> usize {
        self.started_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn started_count(&self) -> usize {
        self.started_count.load(Ordering::SeqCst)
    }

    /// Mark the loop complete: finish collecting in-flight results, then
    /// stop. Does not interrupt work already running.
    pub fn set_complete_only(&self) {
        self.complete_only.store(true, Ordering::SeqCst);
    }

    pub fn is_complete_only(&self) -> bool {
        self.complete_only.load(Ordering::SeqCst)
    }

    /// Mark the loop for termination (implies complete-only).
    pub fn set_terminate_only(&self) {
        self.terminate_only.store(true, Ordering::SeqCst);
        self.set_complete_only();
    }

    pub fn is_terminate_only(&self) -> bool {
        self.terminate_only.load(Ordering::SeqCst)
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut attributes = self.attributes.write().unwrap_or_else(|e| e.into_inner());
        attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        let attributes = self.attributes.read().unwrap_or_else(|e| e.into_inner());
        attributes.get(key).cloned()
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        let attributes = self.attributes.read().unwrap_or_else(|e| e.into_inner());
        attributes.contains_key(key)
    }
}
