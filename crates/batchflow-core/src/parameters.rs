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

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single launch parameter. Only identifying parameters contribute to job
/// instance identity; non-identifying ones (timestamps, tuning knobs) can
/// vary between restarts of the same logical run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: Value,
    pub identifying: bool,
}

/// Ordered set of named parameters passed to a job launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: IndexMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).map(|p| &p.value)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Canonical identity of the identifying subset, used (with the job
    /// name) as the job instance key. Sorted by name so insertion order does
    /// not change identity.
    pub fn identity_key(&self) -> String {
        let mut identifying: Vec<(&String, &JobParameter)> =
            self.parameters.iter().filter(|(_, p)| p.identifying).collect();
        identifying.sort_by(|(a, _), (b, _)| a.cmp(b));
        identifying
            .into_iter()
            .map(|(name, p)| format!("{name}={}", p.value))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Builder for [`JobParameters`].
#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    parameters: IndexMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identifying parameter.
    pub fn add(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(
            name.into(),
            JobParameter {
                value: value.into(),
                identifying: true,
            },
        );
        self
    }

    /// Add a parameter that does not contribute to instance identity.
    pub fn add_non_identifying(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.parameters.insert(
            name.into(),
            JobParameter {
                value: value.into(),
                identifying: false,
            },
        );
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}
