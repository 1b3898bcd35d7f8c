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

use std::sync::Arc;

use crate::context::RepeatContext;
use crate::status::RepeatStatus;

/// Strategy deciding when a repeat loop should stop.
///
/// The template calls [`start`](CompletionPolicy::start) once per batch,
/// [`update`](CompletionPolicy::update) before each iteration, and the two
/// completion checks before (no result yet) and after (with the iteration's
/// result) each unit of work.
pub trait CompletionPolicy: Send + Sync {
    /// Create the context for a new batch, optionally nested under a parent.
    fn start(&self, parent: Option<Arc<RepeatContext>>) -> Arc<RepeatContext> {
        Arc::new(RepeatContext::new(parent))
    }

    /// Record the start of an iteration.
    fn update(&self, context: &RepeatContext) {
        context.increment();
    }

    /// Pre-iteration check: can the batch stop before doing more work?
    fn is_complete(&self, context: &RepeatContext) -> bool;

    /// Post-iteration check with the latest result.
    fn is_complete_with_result(&self, context: &RepeatContext, result: &RepeatStatus) -> bool;
}

/// The template default: the batch is complete exactly when the last result
/// was not continuable. Never stops early on its own.
#[derive(Debug, Default)]
pub struct DefaultResultCompletionPolicy;

impl CompletionPolicy for DefaultResultCompletionPolicy {
    fn is_complete(&self, _context: &RepeatContext) -> bool {
        false
    }

    fn is_complete_with_result(&self, _context: &RepeatContext, result: &RepeatStatus) -> bool {
        !result.is_continuable()
    }
}

/// Complete after a fixed number of iterations (the classic chunk size).
/// Also completes when a result says there is no more work.
#[derive(Debug)]
pub struct SimpleCompletionPolicy {
    chunk_size: usize,
}

impl SimpleCompletionPolicy {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl CompletionPolicy for SimpleCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext) -> bool {
        context.started_count() >= self.chunk_size
    }

    fn is_complete_with_result(&self, context: &RepeatContext, result: &RepeatStatus) -> bool {
        !result.is_continuable() || self.is_complete(context)
    }
}

/// Complete when any member policy is complete. Members share the batch
/// context, so composing counting policies with result-driven ones works as
/// expected.
#[derive(Default)]
pub struct CompositeCompletionPolicy {
    policies: Vec<Arc<dyn CompletionPolicy>>,
}

impl CompositeCompletionPolicy {
    pub fn new(policies: Vec<Arc<dyn CompletionPolicy>>) -> Self {
        Self { policies }
    }
}

impl CompletionPolicy for CompositeCompletionPolicy {
    fn update(&self, context: &RepeatContext) {
        // A single increment for the batch; member policies read the shared
        // counter rather than each bumping it.
        context.increment();
    }

    fn is_complete(&self, context: &RepeatContext) -> bool {
        self.policies.iter().any(|p| p.is_complete(context))
    }

    fn is_complete_with_result(&self, context: &RepeatContext, result: &RepeatStatus) -> bool {
        self.policies
            .iter()
            .any(|p| p.is_complete_with_result(context, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_follows_result() {
        let policy = DefaultResultCompletionPolicy;
        let ctx = RepeatContext::new(None);
        assert!(!policy.is_complete(&ctx));
        assert!(!policy.is_complete_with_result(&ctx, &RepeatStatus::Continuable));
        assert!(policy.is_complete_with_result(&ctx, &RepeatStatus::Finished));
    }

    #[test]
    fn test_simple_policy_counts_iterations() {
        let policy = SimpleCompletionPolicy::new(2);
        let ctx = RepeatContext::new(None);
        assert!(!policy.is_complete(&ctx));
        policy.update(&ctx);
        assert!(!policy.is_complete(&ctx));
        policy.update(&ctx);
        assert!(policy.is_complete(&ctx));
    }

    #[test]
    fn test_composite_completes_when_any_member_does() {
        let policy = CompositeCompletionPolicy::new(vec![
            Arc::new(DefaultResultCompletionPolicy),
            Arc::new(SimpleCompletionPolicy::new(1)),
        ]);
        let ctx = RepeatContext::new(None);
        assert!(!policy.is_complete(&ctx));
        policy.update(&ctx);
        assert!(policy.is_complete(&ctx));
    }
}
