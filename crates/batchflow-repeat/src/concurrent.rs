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

use batchflow_core::{BatchError, Result};
use error_stack::Report;

use crate::context::RepeatContext;
use crate::exception::{DefaultExceptionHandler, ExceptionHandler};
use crate::listener::RepeatListener;
use crate::policy::{CompletionPolicy, DefaultResultCompletionPolicy};
use crate::result_queue::{ResultHolder, ThrottleResultQueue};
use crate::status::RepeatStatus;
use crate::template::{handle_error, is_marked_complete, RepeatCallback};

/// Default limit for concurrently in-flight units of work.
pub const DEFAULT_THROTTLE_LIMIT: usize = 4;

/// Drives a [`RepeatCallback`] with throttled parallelism: each iteration
/// runs as its own tokio task, outcomes come back through a
/// [`ThrottleResultQueue`], and completion decisions stay on the driver.
///
/// Whatever ends the submission loop — the policy, a context mark, or an
/// errored result — the template always drains the queue before returning,
/// so every worker outcome is observed and every worker error is routed
/// through the exception handler exactly once, on the driver.
pub struct ConcurrentRepeatTemplate {
    completion_policy: Arc<dyn CompletionPolicy>,
    exception_handler: Arc<dyn ExceptionHandler>,
    listeners: Vec<Arc<dyn RepeatListener>>,
    throttle_limit: usize,
}

impl ConcurrentRepeatTemplate {
    pub fn new() -> Self {
        Self {
            completion_policy: Arc::new(DefaultResultCompletionPolicy),
            exception_handler: Arc::new(DefaultExceptionHandler),
            listeners: Vec::new(),
            throttle_limit: DEFAULT_THROTTLE_LIMIT,
        }
    }

    pub fn set_completion_policy(&mut self, policy: Arc<dyn CompletionPolicy>) {
        self.completion_policy = policy;
    }

    pub fn set_exception_handler(&mut self, handler: Arc<dyn ExceptionHandler>) {
        self.exception_handler = handler;
    }

    pub fn register_listener(&mut self, listener: Arc<dyn RepeatListener>) {
        self.listeners.push(listener);
    }

    pub fn set_throttle_limit(&mut self, throttle_limit: usize) {
        self.throttle_limit = throttle_limit;
    }

    pub async fn iterate(&self, callback: Arc<dyn RepeatCallback>) -> Result<RepeatStatus> {
        let context = self.completion_policy.start(None);
        let mut running = !is_marked_complete(&context);

        for listener in &self.listeners {
            listener.open(&context);
            running = running && !is_marked_complete(&context);
            if !running {
                break;
            }
        }

        let queue = Arc::new(ThrottleResultQueue::new(self.throttle_limit));
        let mut result = RepeatStatus::Continuable;
        let mut deferred: Vec<Report<BatchError>> = Vec::new();

        while running {
            for listener in &self.listeners {
                listener.before(&context);
                running = running && !is_marked_complete(&context);
            }
            if !running {
                break;
            }

            // Backpressure point: waits while the throttle limit of units is
            // in flight.
            queue.expect().await?;
            self.submit(callback.clone(), context.clone(), queue.clone());
            self.completion_policy.update(&context);

            // Keep submitting while no outcome has come back and the policy
            // allows more work.
            if queue.is_empty()
                && !self.completion_policy.is_complete(&context)
                && !is_marked_complete(&context)
            {
                continue;
            }

            let holder = queue.take().await?;
            match holder.result {
                Ok(status) => {
                    for listener in &self.listeners {
                        listener.after(&holder.context, &status);
                    }
                    result = result.and(status);
                    if self.completion_policy.is_complete_with_result(&context, &status)
                        || is_marked_complete(&context)
                    {
                        running = false;
                    }
                }
                Err(error) => {
                    handle_error(
                        &holder.context,
                        error,
                        self.exception_handler.as_ref(),
                        &self.listeners,
                        &mut deferred,
                    );
                    if !deferred.is_empty()
                        || is_marked_complete(&context)
                        || self.completion_policy.is_complete(&context)
                    {
                        running = false;
                    }
                }
            }
        }

        // Mandatory drain: collect every outstanding outcome even though the
        // completion decision was already made.
        while queue.is_expecting() {
            let holder = queue.take().await?;
            match holder.result {
                Ok(status) => {
                    for listener in &self.listeners {
                        listener.after(&holder.context, &status);
                    }
                    result = result.and(status);
                }
                Err(error) => {
                    handle_error(
                        &holder.context,
                        error,
                        self.exception_handler.as_ref(),
                        &self.listeners,
                        &mut deferred,
                    );
                }
            }
        }
        queue.verify_drained()?;

        for listener in self.listeners.iter().rev() {
            listener.close(&context);
        }

        if let Some(first) = deferred.into_iter().next() {
            return Err(first);
        }
        Ok(result)
    }

    /// Run one unit on the pool. The worker never throws: its outcome,
    /// error included, travels back through the queue as data.
    fn submit(
        &self,
        callback: Arc<dyn RepeatCallback>,
        context: Arc<RepeatContext>,
        queue: Arc<ThrottleResultQueue>,
    ) {
        tokio::spawn(async move {
            let result = callback.execute(context.clone()).await;
            if let Err(refused) = queue.put(ResultHolder { context, result }) {
                // Unreachable when the expect/put pairing is respected.
                log::error!("worker result refused by the queue: {refused:?}");
            }
        });
    }
}

impl Default for ConcurrentRepeatTemplate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SimpleCompletionPolicy;
    use error_stack::report;
    use futures::future::BoxFuture;
    use futures::FutureExt as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingCallback {
        calls: AtomicUsize,
        finish_after: usize,
        max_concurrent: AtomicUsize,
        concurrent: AtomicUsize,
    }

    impl CountingCallback {
        fn new(finish_after: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                finish_after,
                max_concurrent: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
            })
        }
    }

    impl RepeatCallback for Arc<CountingCallback> {
        fn execute(
            &self,
            _context: Arc<RepeatContext>,
        ) -> BoxFuture<'static, Result<RepeatStatus>> {
            let this = self.clone();
            async move {
                let n = this.calls.fetch_add(1, Ordering::SeqCst) + 1;
                let live = this.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                this.max_concurrent.fetch_max(live, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                this.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(RepeatStatus::continue_if(n < this.finish_after))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_runs_to_completion_and_drains() {
        let callback = CountingCallback::new(8);
        let template = ConcurrentRepeatTemplate::new();
        let status = template.iterate(Arc::new(callback.clone())).await.unwrap();
        assert_eq!(status, RepeatStatus::Finished);
        // At least `finish_after` calls happened; overshoot is allowed
        // because submissions race the finishing result, but every outcome
        // was collected (iterate returned without a protocol error).
        assert!(callback.calls.load(Ordering::SeqCst) >= 8);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_throttle_limit() {
        let callback = CountingCallback::new(20);
        let mut template = ConcurrentRepeatTemplate::new();
        template.set_throttle_limit(3);
        template.set_completion_policy(Arc::new(SimpleCompletionPolicy::new(20)));
        template.iterate(Arc::new(callback.clone())).await.unwrap();
        assert!(callback.max_concurrent.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_policy_caps_submissions() {
        let callback = CountingCallback::new(usize::MAX);
        let mut template = ConcurrentRepeatTemplate::new();
        template.set_completion_policy(Arc::new(SimpleCompletionPolicy::new(5)));
        let status = template.iterate(Arc::new(callback.clone())).await.unwrap();
        assert_eq!(status, RepeatStatus::Continuable);
        assert_eq!(callback.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_worker_error_is_reraised_on_the_driver_after_drain() {
        struct FailingCallback;
        impl RepeatCallback for FailingCallback {
            fn execute(
                &self,
                _context: Arc<RepeatContext>,
            ) -> BoxFuture<'static, Result<RepeatStatus>> {
                async move { Err(report!(BatchError::Tasklet("worker boom".into()))) }.boxed()
            }
        }
        let template = ConcurrentRepeatTemplate::new();
        let err = template.iterate(Arc::new(FailingCallback)).await.unwrap_err();
        assert!(matches!(err.current_context(), BatchError::Tasklet(_)));
    }
}
