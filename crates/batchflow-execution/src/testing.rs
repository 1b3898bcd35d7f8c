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

//! Test support: behavior-programmable tasklets, item components, and step
//! shorthands used by the crate's own tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use error_stack::report;
use futures::future::BoxFuture;
use futures::FutureExt as _;

use batchflow_core::{BatchError, Result, StepContribution};
use batchflow_repeat::RepeatStatus;
use batchflow_state::JobRepository;

use crate::step::{ChunkContext, ItemProcessor, ItemWriter, Step, Tasklet, TaskletStep};

/// Tasklet that reports `Continuable` for a fixed number of chunks, then
/// finishes. Each chunk contributes one read.
pub struct CountingTasklet {
    chunks: usize,
    executed: AtomicUsize,
}

impl CountingTasklet {
    pub fn new(chunks: usize) -> Self {
        Self {
            chunks,
            executed: AtomicUsize::new(0),
        }
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

impl Tasklet for CountingTasklet {
    fn execute<'a>(
        &'a self,
        contribution: &'a mut StepContribution,
        _context: &'a ChunkContext,
    ) -> BoxFuture<'a, Result<RepeatStatus>> {
        async move {
            let executed = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
            contribution.increment_read_count();
            // Give concurrently running branches a chance to interleave.
            tokio::task::yield_now().await;
            Ok(RepeatStatus::continue_if(executed < self.chunks))
        }
        .boxed()
    }
}

/// Tasklet that always fails.
pub struct FailingTasklet {
    message: String,
}

impl FailingTasklet {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Tasklet for FailingTasklet {
    fn execute<'a>(
        &'a self,
        _contribution: &'a mut StepContribution,
        _context: &'a ChunkContext,
    ) -> BoxFuture<'a, Result<RepeatStatus>> {
        async move { Err(report!(BatchError::Tasklet(self.message.clone()))) }.boxed()
    }
}

/// Tasklet that fails its first `failures` chunks, then succeeds — for
/// restart scenarios where the second attempt goes through.
pub struct FlakyTasklet {
    failures_remaining: AtomicUsize,
}

impl FlakyTasklet {
    pub fn new(failures: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(failures),
        }
    }
}

impl Tasklet for FlakyTasklet {
    fn execute<'a>(
        &'a self,
        contribution: &'a mut StepContribution,
        _context: &'a ChunkContext,
    ) -> BoxFuture<'a, Result<RepeatStatus>> {
        async move {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(report!(BatchError::Tasklet("flaky failure".into())));
            }
            contribution.increment_read_count();
            Ok(RepeatStatus::Finished)
        }
        .boxed()
    }
}

/// Tasklet that requests a cooperative stop of the whole job on its first
/// chunk and keeps reporting `Continuable`; the next iteration observes the
/// stop flag.
pub struct StoppingTasklet;

impl Tasklet for StoppingTasklet {
    fn execute<'a>(
        &'a self,
        _contribution: &'a mut StepContribution,
        context: &'a ChunkContext,
    ) -> BoxFuture<'a, Result<RepeatStatus>> {
        async move {
            context.job_execution.write().await.stop().await;
            Ok(RepeatStatus::Continuable)
        }
        .boxed()
    }
}

/// Writer that collects everything it is given.
pub struct CollectingItemWriter<O> {
    items: Mutex<Vec<O>>,
}

impl<O: Clone + Send> CollectingItemWriter<O> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn items(&self) -> Vec<O> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<O: Clone + Send> Default for CollectingItemWriter<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Clone + Send + Sync> ItemWriter<O> for CollectingItemWriter<O> {
    fn write<'a>(&'a self, items: &'a [O]) -> BoxFuture<'a, Result<()>> {
        async move {
            self.items
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(items);
            Ok(())
        }
        .boxed()
    }
}

/// Processor that fails items matching a predicate with a skippable item
/// error and passes the rest through.
pub struct SelectiveFailingProcessor<F> {
    failing: F,
}

impl<F> SelectiveFailingProcessor<F> {
    pub fn new(failing: F) -> Self {
        Self { failing }
    }
}

impl<I, F> ItemProcessor<I, I> for SelectiveFailingProcessor<F>
where
    I: std::fmt::Debug + Send + 'static,
    F: Fn(&I) -> bool + Send + Sync,
{
    fn process(&self, item: I) -> BoxFuture<'_, Result<Option<I>>> {
        let failed = (self.failing)(&item);
        async move {
            if failed {
                Err(report!(BatchError::Item(format!("rejected item {item:?}"))))
            } else {
                Ok(Some(item))
            }
        }
        .boxed()
    }
}

/// A step that completes successfully after one chunk.
pub fn success_step(name: &str, repository: Arc<dyn JobRepository>) -> Arc<dyn Step> {
    Arc::new(
        TaskletStep::builder(name, Arc::new(CountingTasklet::new(1)), repository).build(),
    )
}

/// A step that fails.
pub fn failing_step(name: &str, repository: Arc<dyn JobRepository>) -> Arc<dyn Step> {
    Arc::new(
        TaskletStep::builder(name, Arc::new(FailingTasklet::new("boom")), repository).build(),
    )
}
