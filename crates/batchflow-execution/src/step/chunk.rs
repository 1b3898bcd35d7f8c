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

//! Chunk-oriented processing: read a chunk of items, process each, write
//! the survivors, with skip/retry classification wired around every phase.

use std::collections::VecDeque;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::Mutex;

use error_stack::Report;
use futures::future::BoxFuture;
use futures::FutureExt as _;

use batchflow_core::{BatchError, Result, StepContribution};
use batchflow_repeat::{CompletionPolicy, RepeatStatus, SimpleCompletionPolicy};

use super::fault_tolerant::{RetryContextCache, SimpleRetryPolicy, SkipPolicy};
use super::tasklet::{ChunkContext, Tasklet};

/// Source of items. `Ok(None)` signals end of data.
pub trait ItemReader<I>: Send + Sync {
    fn read(&self) -> BoxFuture<'_, Result<Option<I>>>;
}

/// Item transformation. `Ok(None)` filters the item out (counted, not
/// skipped).
pub trait ItemProcessor<I, O>: Send + Sync {
    fn process(&self, item: I) -> BoxFuture<'_, Result<Option<O>>>;
}

/// Sink for a chunk's processed items.
pub trait ItemWriter<O>: Send + Sync {
    fn write<'a>(&'a self, items: &'a [O]) -> BoxFuture<'a, Result<()>>;
}

/// Processor that hands every item through unchanged.
pub struct PassThroughItemProcessor<I> {
    marker: PhantomData<fn() -> I>,
}

impl<I> PassThroughItemProcessor<I> {
    pub fn new() -> Self {
        Self { marker: PhantomData }
    }
}

impl<I> Default for PassThroughItemProcessor<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Send + 'static> ItemProcessor<I, I> for PassThroughItemProcessor<I> {
    fn process(&self, item: I) -> BoxFuture<'_, Result<Option<I>>> {
        async move { Ok(Some(item)) }.boxed()
    }
}

/// Reader over a fixed list of items. Handy for drives from memory and for
/// tests; production readers wrap real data sources behind the same trait.
pub struct VecItemReader<I> {
    items: Mutex<VecDeque<I>>,
}

impl<I: Send> VecItemReader<I> {
    pub fn new(items: Vec<I>) -> Self {
        Self {
            items: Mutex::new(items.into()),
        }
    }
}

impl<I: Send> ItemReader<I> for VecItemReader<I> {
    fn read(&self) -> BoxFuture<'_, Result<Option<I>>> {
        let next = self.items.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        async move { Ok(next) }.boxed()
    }
}

/// A [`Tasklet`] that processes one chunk per invocation: reads up to the
/// chunk completion policy, processes, writes, and reports `Continuable`
/// until the reader is exhausted.
///
/// Failure handling per phase:
/// - read errors consult the skip policy (`read_skip_count`);
/// - process errors are retried in place when the retry policy covers them
///   (attempts tracked in the identity-keyed cache), then offered to the
///   skip policy (`process_skip_count`);
/// - a write error triggers an item-by-item rescan when a skip policy is
///   present, isolating the failing items (`write_skip_count`).
///
/// Anything unclassified, or past a limit, escalates to step failure.
pub struct ChunkOrientedTasklet<I, O> {
    reader: Arc<dyn ItemReader<I>>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: Arc<dyn ItemWriter<O>>,
    chunk_policy: Arc<dyn CompletionPolicy>,
    skip_policy: Option<Arc<dyn SkipPolicy>>,
    retry_policy: Option<SimpleRetryPolicy>,
    retry_cache: RetryContextCache<I>,
}

impl<I, O> ChunkOrientedTasklet<I, O>
where
    I: Clone + Eq + Hash + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(
        reader: Arc<dyn ItemReader<I>>,
        processor: Arc<dyn ItemProcessor<I, O>>,
        writer: Arc<dyn ItemWriter<O>>,
        chunk_size: usize,
    ) -> Self {
        Self {
            reader,
            processor,
            writer,
            chunk_policy: Arc::new(SimpleCompletionPolicy::new(chunk_size)),
            skip_policy: None,
            retry_policy: None,
            retry_cache: RetryContextCache::new(RetryContextCache::<I>::DEFAULT_CAPACITY),
        }
    }

    pub fn with_skip_policy(mut self, skip_policy: Arc<dyn SkipPolicy>) -> Self {
        self.skip_policy = Some(skip_policy);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: SimpleRetryPolicy, cache_capacity: usize) -> Self {
        self.retry_policy = Some(retry_policy);
        self.retry_cache = RetryContextCache::new(cache_capacity);
        self
    }

    fn try_skip(&self, error: &Report<BatchError>, skip_count: u64) -> Result<bool> {
        match &self.skip_policy {
            None => Ok(false),
            Some(policy) => policy.should_skip(error, skip_count),
        }
    }
}

impl<I, O> Tasklet for ChunkOrientedTasklet<I, O>
where
    I: Clone + Eq + Hash + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn execute<'a>(
        &'a self,
        contribution: &'a mut StepContribution,
        context: &'a ChunkContext,
    ) -> BoxFuture<'a, Result<RepeatStatus>> {
        async move {
            let prior_skips = context.step_execution.read().await.skip_count();

            // Read phase
            let read_context = self.chunk_policy.start(Some(context.repeat_context.clone()));
            let mut items: Vec<I> = Vec::new();
            let mut exhausted = false;
            while !self.chunk_policy.is_complete(&read_context) {
                self.chunk_policy.update(&read_context);
                match self.reader.read().await {
                    Ok(Some(item)) => {
                        contribution.increment_read_count();
                        items.push(item);
                    }
                    Ok(None) => {
                        exhausted = true;
                        break;
                    }
                    Err(error) => {
                        if self.try_skip(&error, prior_skips + contribution.skip_count())? {
                            log::debug!("skipping unreadable item: {error}");
                            contribution.increment_read_skip_count();
                        } else {
                            return Err(error);
                        }
                    }
                }
            }

            // Process phase
            let mut outputs: Vec<O> = Vec::with_capacity(items.len());
            'items: for item in items {
                loop {
                    match self.processor.process(item.clone()).await {
                        Ok(Some(output)) => {
                            if self.retry_policy.is_some() {
                                self.retry_cache.remove(&item);
                            }
                            outputs.push(output);
                            continue 'items;
                        }
                        Ok(None) => {
                            if self.retry_policy.is_some() {
                                self.retry_cache.remove(&item);
                            }
                            contribution.increment_filter_count();
                            continue 'items;
                        }
                        Err(error) => {
                            let mut retry_exhausted = false;
                            if let Some(retry) = &self.retry_policy {
                                if retry.can_retry(&error) {
                                    let attempts = self.retry_cache.register_failure(&item)?;
                                    if attempts < retry.max_attempts() {
                                        log::debug!(
                                            "retrying failed item (attempt {attempts} of {}): {error}",
                                            retry.max_attempts()
                                        );
                                        continue;
                                    }
                                    self.retry_cache.remove(&item);
                                    retry_exhausted = true;
                                }
                            }
                            if self.try_skip(&error, prior_skips + contribution.skip_count())? {
                                log::debug!("skipping unprocessable item: {error}");
                                contribution.increment_process_skip_count();
                                continue 'items;
                            }
                            if retry_exhausted {
                                let attempts = self
                                    .retry_policy
                                    .as_ref()
                                    .map(SimpleRetryPolicy::max_attempts)
                                    .unwrap_or(0);
                                return Err(
                                    error.change_context(BatchError::RetryExhausted { attempts })
                                );
                            }
                            return Err(error);
                        }
                    }
                }
            }

            // Write phase
            if !outputs.is_empty() {
                match self.writer.write(&outputs).await {
                    Ok(()) => contribution.increment_write_count(outputs.len() as u64),
                    Err(error) => {
                        if self.skip_policy.is_none() {
                            return Err(error);
                        }
                        log::debug!("chunk write failed, rescanning item by item: {error}");
                        for output in &outputs {
                            match self.writer.write(std::slice::from_ref(output)).await {
                                Ok(()) => contribution.increment_write_count(1),
                                Err(item_error) => {
                                    if self
                                        .try_skip(&item_error, prior_skips + contribution.skip_count())?
                                    {
                                        contribution.increment_write_skip_count();
                                    } else {
                                        return Err(item_error);
                                    }
                                }
                            }
                        }
                    }
                }
            }

            Ok(RepeatStatus::continue_if(!exhausted))
        }
        .boxed()
    }
}
