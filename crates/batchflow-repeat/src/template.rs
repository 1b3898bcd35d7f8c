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
use futures::future::BoxFuture;

use crate::context::RepeatContext;
use crate::exception::{DefaultExceptionHandler, ExceptionHandler};
use crate::listener::RepeatListener;
use crate::policy::{CompletionPolicy, DefaultResultCompletionPolicy};
use crate::status::RepeatStatus;

/// One unit of work inside a repeat loop.
///
/// The callback may run on a worker task (concurrent template), so it takes
/// the shared context by value and returns an owned future.
pub trait RepeatCallback: Send + Sync {
    fn execute(&self, context: Arc<RepeatContext>) -> BoxFuture<'static, Result<RepeatStatus>>;
}

impl<F> RepeatCallback for F
where
    F: Fn(Arc<RepeatContext>) -> BoxFuture<'static, Result<RepeatStatus>> + Send + Sync,
{
    fn execute(&self, context: Arc<RepeatContext>) -> BoxFuture<'static, Result<RepeatStatus>> {
        (self)(context)
    }
}

/// Drives a [`RepeatCallback`] inline until the completion policy says stop.
///
/// Callback errors are not propagated mid-loop: each one is routed through
/// the exception handler, and anything the handler rethrows is deferred and
/// re-raised exactly once after the loop has closed down. The returned
/// status is the logical AND of all iteration results.
pub struct RepeatTemplate {
    completion_policy: Arc<dyn CompletionPolicy>,
    exception_handler: Arc<dyn ExceptionHandler>,
    listeners: Vec<Arc<dyn RepeatListener>>,
}

impl RepeatTemplate {
    pub fn new() -> Self {
        Self {
            completion_policy: Arc::new(DefaultResultCompletionPolicy),
            exception_handler: Arc::new(DefaultExceptionHandler),
            listeners: Vec::new(),
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

    pub async fn iterate(&self, callback: &dyn RepeatCallback) -> Result<RepeatStatus> {
        let context = self.completion_policy.start(None);
        let mut running = !is_marked_complete(&context);

        for listener in &self.listeners {
            listener.open(&context);
            running = running && !is_marked_complete(&context);
            if !running {
                break;
            }
        }

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

            self.completion_policy.update(&context);
            match callback.execute(context.clone()).await {
                Ok(status) => {
                    for listener in &self.listeners {
                        listener.after(&context, &status);
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
                        &context,
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

        for listener in self.listeners.iter().rev() {
            listener.close(&context);
        }

        if let Some(first) = deferred.into_iter().next() {
            return Err(first);
        }
        Ok(result)
    }
}

impl Default for RepeatTemplate {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn is_marked_complete(context: &RepeatContext) -> bool {
    context.is_complete_only() || context.is_terminate_only()
}

/// Route a callback error through the listeners and the exception handler;
/// whatever the handler rethrows lands on the deferred list.
pub(crate) fn handle_error(
    context: &RepeatContext,
    error: Report<BatchError>,
    handler: &dyn ExceptionHandler,
    listeners: &[Arc<dyn RepeatListener>],
    deferred: &mut Vec<Report<BatchError>>,
) {
    for listener in listeners {
        listener.on_error(context, &error);
    }
    if let Err(rethrown) = handler.handle(context, error) {
        log::debug!("deferring callback error for rethrow after the batch: {rethrown}");
        deferred.push(rethrown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::SimpleLimitExceptionHandler;
    use crate::policy::SimpleCompletionPolicy;
    use error_stack::report;
    use futures::FutureExt as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(
        calls: Arc<AtomicUsize>,
        finish_after: usize,
    ) -> impl Fn(Arc<RepeatContext>) -> BoxFuture<'static, Result<RepeatStatus>> {
        move |_ctx| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(RepeatStatus::continue_if(n < finish_after)) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_iterates_until_callback_finishes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let template = RepeatTemplate::new();
        let callback = counting_callback(calls.clone(), 3);
        let status = template.iterate(&callback).await.unwrap();
        assert_eq!(status, RepeatStatus::Finished);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_simple_policy_caps_iterations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut template = RepeatTemplate::new();
        template.set_completion_policy(Arc::new(SimpleCompletionPolicy::new(2)));
        // Callback always wants more; the policy stops it at 2.
        let callback = counting_callback(calls.clone(), usize::MAX);
        let status = template.iterate(&callback).await.unwrap();
        assert_eq!(status, RepeatStatus::Continuable);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_is_deferred_and_rethrown_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let template = RepeatTemplate::new();
        let calls_inner = calls.clone();
        let callback = move |_ctx: Arc<RepeatContext>| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            async move { Err(report!(BatchError::Tasklet("boom".into()))) }.boxed()
        };
        let err = template.iterate(&callback).await.unwrap_err();
        assert!(matches!(err.current_context(), BatchError::Tasklet(_)));
        // The loop stops on the first rethrown error.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_absorbed_errors_do_not_stop_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut template = RepeatTemplate::new();
        template.set_completion_policy(Arc::new(SimpleCompletionPolicy::new(3)));
        template.set_exception_handler(Arc::new(SimpleLimitExceptionHandler::new(10, |e| {
            matches!(e, BatchError::Item(_))
        })));
        let calls_inner = calls.clone();
        let callback = move |_ctx: Arc<RepeatContext>| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            async move { Err(report!(BatchError::Item("skippable".into()))) }.boxed()
        };
        let status = template.iterate(&callback).await.unwrap();
        assert_eq!(status, RepeatStatus::Continuable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminate_only_stops_iteration() {
        let template = RepeatTemplate::new();
        let callback = move |ctx: Arc<RepeatContext>| {
            async move {
                ctx.set_terminate_only();
                Ok(RepeatStatus::Continuable)
            }
            .boxed()
        };
        let status = template.iterate(&callback).await.unwrap();
        assert_eq!(status, RepeatStatus::Continuable);
    }
}
