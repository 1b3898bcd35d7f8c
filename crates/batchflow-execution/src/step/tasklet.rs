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

//! [`TaskletStep`]: the one concrete [`Step`]. Drives a [`Tasklet`] through
//! a repeat template (inline or pooled), applies chunk contributions under
//! the step execution's lock, persists progress after every chunk, and maps
//! the outcome onto the step's batch/exit status.

use std::sync::Arc;

use chrono::Utc;
use error_stack::{report, Report, ResultExt as _};
use futures::future::BoxFuture;
use futures::FutureExt as _;

use batchflow_core::{
    BatchError, BatchStatus, ExitStatus, Result, SharedJobExecution, SharedStepExecution,
    StepContribution,
};
use batchflow_repeat::{
    CompletionPolicy, ConcurrentRepeatTemplate, ExceptionHandler, RepeatCallback, RepeatContext,
    RepeatStatus, RepeatTemplate,
};
use batchflow_state::JobRepository;

use super::{Step, StepExecutionListener};

/// Everything one chunk invocation can reach: the shared executions (for
/// cooperative signals and counters) and the repeat context of the step's
/// chunk loop.
pub struct ChunkContext {
    pub job_execution: SharedJobExecution,
    pub step_execution: SharedStepExecution,
    pub repeat_context: Arc<RepeatContext>,
}

/// One chunk of business work. Returns `Continuable` while there is more
/// work; counter deltas go on the contribution, which the engine applies to
/// the step execution when the chunk completes.
pub trait Tasklet: Send + Sync {
    fn execute<'a>(
        &'a self,
        contribution: &'a mut StepContribution,
        context: &'a ChunkContext,
    ) -> BoxFuture<'a, Result<RepeatStatus>>;
}

enum StepOperations {
    Inline(RepeatTemplate),
    Pooled(ConcurrentRepeatTemplate),
}

/// A [`Step`] that repeats a [`Tasklet`] until its repeat template says
/// stop. Fault tolerance, chunk orientation and parallelism are all
/// composed in: via the tasklet, its policies, and the choice of template.
pub struct TaskletStep {
    name: String,
    tasklet: Arc<dyn Tasklet>,
    repository: Arc<dyn JobRepository>,
    listeners: Vec<Arc<dyn StepExecutionListener>>,
    start_limit: usize,
    allow_start_if_complete: bool,
    operations: StepOperations,
}

impl TaskletStep {
    pub fn builder(
        name: impl Into<String>,
        tasklet: Arc<dyn Tasklet>,
        repository: Arc<dyn JobRepository>,
    ) -> StepBuilder {
        StepBuilder::new(name, tasklet, repository)
    }
}

impl Step for TaskletStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn start_limit(&self) -> usize {
        self.start_limit
    }

    fn execute<'a>(
        &'a self,
        job_execution: &'a SharedJobExecution,
        step_execution: &'a SharedStepExecution,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            log::info!("executing step '{}'", self.name);
            {
                let mut step = step_execution.write().await;
                step.start_time = Some(Utc::now());
                step.upgrade_status(BatchStatus::Started);
            }
            self.repository
                .update_step_execution(step_execution)
                .await
                .change_context(BatchError::Repository)?;

            for listener in &self.listeners {
                listener.before_step(step_execution).await;
            }

            let callback = TaskletCallback {
                step_name: self.name.clone(),
                tasklet: self.tasklet.clone(),
                repository: self.repository.clone(),
                job_execution: job_execution.clone(),
                step_execution: step_execution.clone(),
            };
            let outcome = match &self.operations {
                StepOperations::Inline(template) => template.iterate(&callback).await,
                StepOperations::Pooled(template) => template.iterate(Arc::new(callback)).await,
            };

            let (status, exit_status, error) = classify_outcome(outcome);
            {
                let mut step = step_execution.write().await;
                step.upgrade_status(status);
                step.exit_status = step.exit_status.and(&exit_status);
                if let Some(error) = &error {
                    step.add_failure_exception(format!("{error:?}"));
                }
            }

            for listener in self.listeners.iter().rev() {
                if let Some(contributed) = listener.after_step(step_execution).await {
                    let mut step = step_execution.write().await;
                    step.exit_status = step.exit_status.and(&contributed);
                }
            }

            step_execution.write().await.end_time = Some(Utc::now());

            let persisted = {
                match self.repository.update_execution_context(step_execution).await {
                    Ok(()) => self.repository.update_step_execution(step_execution).await,
                    Err(error) => Err(error),
                }
            };
            if let Err(persist_error) = persisted {
                {
                    let mut step = step_execution.write().await;
                    step.status = BatchStatus::Unknown;
                    step.exit_status = step.exit_status.and(&ExitStatus::unknown());
                }
                log::error!(
                    "failed to persist final state of step '{}', execution state untrusted: {persist_error:?}",
                    self.name
                );
                return Err(persist_error.change_context(BatchError::Repository));
            }

            match error {
                None => Ok(()),
                Some(error) => match error.current_context() {
                    BatchError::StepInterrupted(_)
                    | BatchError::JobInterrupted
                    | BatchError::Repository => Err(error),
                    // The failure is recorded on the execution as a FAILED
                    // status; the flow branches on it rather than aborting.
                    _ => Ok(()),
                },
            }
        }
        .boxed()
    }
}

fn classify_outcome(
    outcome: Result<RepeatStatus>,
) -> (BatchStatus, ExitStatus, Option<Report<BatchError>>) {
    match outcome {
        Ok(_) => (BatchStatus::Completed, ExitStatus::completed(), None),
        Err(error) => match error.current_context() {
            BatchError::StepInterrupted(_) | BatchError::JobInterrupted => {
                (BatchStatus::Stopped, ExitStatus::stopped(), Some(error))
            }
            BatchError::Repository => (
                BatchStatus::Unknown,
                ExitStatus::unknown().add_exit_description(
                    "meta-data update failed; execution state is untrusted, do not restart automatically",
                ),
                Some(error),
            ),
            _ => {
                let exit_status = ExitStatus::failed().add_error_description(&error);
                (BatchStatus::Failed, exit_status, Some(error))
            }
        },
    }
}

/// Bridges the tasklet into the repeat engine: polls the cooperative stop
/// flags between iterations, applies the chunk contribution under the step
/// execution's lock, and persists checkpoint and counters after each chunk.
#[derive(Clone)]
struct TaskletCallback {
    step_name: String,
    tasklet: Arc<dyn Tasklet>,
    repository: Arc<dyn JobRepository>,
    job_execution: SharedJobExecution,
    step_execution: SharedStepExecution,
}

impl RepeatCallback for TaskletCallback {
    fn execute(&self, repeat_context: Arc<RepeatContext>) -> BoxFuture<'static, Result<RepeatStatus>> {
        let this = self.clone();
        async move {
            // One lock at a time here: `stop()` takes the job and step locks
            // in the opposite order, so overlapping guards could deadlock.
            let step_interrupted = { this.step_execution.read().await.is_terminate_only() };
            let job_stopping = { this.job_execution.read().await.is_stopping() };
            if step_interrupted || job_stopping {
                log::info!("step '{}' observed a stop request", this.step_name);
                return Err(report!(BatchError::StepInterrupted(this.step_name.clone())));
            }

            let chunk_context = ChunkContext {
                job_execution: this.job_execution.clone(),
                step_execution: this.step_execution.clone(),
                repeat_context,
            };
            let mut contribution = StepContribution::new();
            let result = this.tasklet.execute(&mut contribution, &chunk_context).await;

            {
                let mut step = this.step_execution.write().await;
                step.apply(&contribution);
                match &result {
                    Ok(_) => step.increment_commit_count(),
                    Err(_) => step.increment_rollback_count(),
                }
            }
            this.repository
                .update_execution_context(&this.step_execution)
                .await
                .change_context(BatchError::Repository)?;
            this.repository
                .update_step_execution(&this.step_execution)
                .await
                .change_context(BatchError::Repository)?;
            result
        }
        .boxed()
    }
}

/// Builder for [`TaskletStep`].
pub struct StepBuilder {
    name: String,
    tasklet: Arc<dyn Tasklet>,
    repository: Arc<dyn JobRepository>,
    listeners: Vec<Arc<dyn StepExecutionListener>>,
    start_limit: usize,
    allow_start_if_complete: bool,
    completion_policy: Option<Arc<dyn CompletionPolicy>>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    throttle_limit: Option<usize>,
}

impl StepBuilder {
    pub fn new(
        name: impl Into<String>,
        tasklet: Arc<dyn Tasklet>,
        repository: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            name: name.into(),
            tasklet,
            repository,
            listeners: Vec::new(),
            start_limit: usize::MAX,
            allow_start_if_complete: false,
            completion_policy: None,
            exception_handler: None,
            throttle_limit: None,
        }
    }

    pub fn listener(mut self, listener: Arc<dyn StepExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn start_limit(mut self, start_limit: usize) -> Self {
        self.start_limit = start_limit;
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    /// Override the completion policy of the step's outer chunk loop.
    pub fn completion_policy(mut self, policy: Arc<dyn CompletionPolicy>) -> Self {
        self.completion_policy = Some(policy);
        self
    }

    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Fan chunk processing out across the worker pool, with at most
    /// `throttle_limit` chunks in flight.
    pub fn throttle_limit(mut self, throttle_limit: usize) -> Self {
        self.throttle_limit = Some(throttle_limit);
        self
    }

    pub fn build(self) -> TaskletStep {
        let operations = match self.throttle_limit {
            Some(limit) => {
                let mut template = ConcurrentRepeatTemplate::new();
                template.set_throttle_limit(limit);
                if let Some(policy) = self.completion_policy {
                    template.set_completion_policy(policy);
                }
                if let Some(handler) = self.exception_handler {
                    template.set_exception_handler(handler);
                }
                StepOperations::Pooled(template)
            }
            None => {
                let mut template = RepeatTemplate::new();
                if let Some(policy) = self.completion_policy {
                    template.set_completion_policy(policy);
                }
                if let Some(handler) = self.exception_handler {
                    template.set_exception_handler(handler);
                }
                StepOperations::Inline(template)
            }
        };
        TaskletStep {
            name: self.name,
            tasklet: self.tasklet,
            repository: self.repository,
            listeners: self.listeners,
            start_limit: self.start_limit,
            allow_start_if_complete: self.allow_start_if_complete,
            operations,
        }
    }
}
