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

//! The job layer: a [`Job`] owns a [`Flow`], drives it to a terminal
//! status, and maps that status (or a failure) onto the job execution.

pub mod launcher;
pub mod step_handler;

pub use launcher::JobLauncher;
pub use step_handler::StepHandler;

use std::sync::Arc;

use chrono::Utc;
use error_stack::ResultExt as _;
use futures::future::BoxFuture;
use futures::FutureExt as _;

use batchflow_core::{
    BatchError, BatchStatus, ExitStatus, Result, SharedJobExecution,
};
use batchflow_state::JobRepository;

use crate::flow::{Flow, FlowExecutor, JobFlowExecutor, RESTART_STATE_KEY};

/// Observer around a whole job execution. `after_job` always runs, whatever
/// the outcome, in reverse registration order.
pub trait JobExecutionListener: Send + Sync {
    fn before_job<'a>(&'a self, _job_execution: &'a SharedJobExecution) -> BoxFuture<'a, ()> {
        async {}.boxed()
    }

    fn after_job<'a>(&'a self, _job_execution: &'a SharedJobExecution) -> BoxFuture<'a, ()> {
        async {}.boxed()
    }
}

/// Top-level entry point for one batch job.
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a failed or stopped instance of this job may be run again.
    fn is_restartable(&self) -> bool {
        true
    }

    /// All step names in the job, nested flows flattened.
    fn step_names(&self) -> Vec<String>;

    /// Drive the given execution to a terminal status. The outcome —
    /// success, failure, stop — is recorded on the execution; `Err` is
    /// reserved for the distinguished signals (interruption, untrusted
    /// meta-data, broken flow configuration).
    fn execute<'a>(&'a self, execution: &'a SharedJobExecution) -> BoxFuture<'a, Result<()>>;
}

/// A [`Job`] that delegates sequencing to a [`Flow`].
pub struct FlowJob {
    name: String,
    flow: Arc<Flow>,
    repository: Arc<dyn JobRepository>,
    listeners: Vec<Arc<dyn JobExecutionListener>>,
    restartable: bool,
}

impl FlowJob {
    pub fn new(name: impl Into<String>, flow: Arc<Flow>, repository: Arc<dyn JobRepository>) -> Self {
        Self {
            name: name.into(),
            flow,
            repository,
            listeners: Vec::new(),
            restartable: true,
        }
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn JobExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl Job for FlowJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn step_names(&self) -> Vec<String> {
        self.flow.step_names()
    }

    fn execute<'a>(&'a self, execution: &'a SharedJobExecution) -> BoxFuture<'a, Result<()>> {
        async move {
            log::info!("job '{}' starting", self.name);
            {
                let mut job_execution = execution.write().await;
                job_execution.start_time = Some(Utc::now());
                job_execution.upgrade_status(BatchStatus::Started);
            }
            self.repository
                .update_job_execution(execution)
                .await
                .change_context(BatchError::Repository)?;

            for listener in &self.listeners {
                listener.before_job(execution).await;
            }

            let executor: Arc<dyn FlowExecutor> = Arc::new(JobFlowExecutor::new(
                execution.clone(),
                StepHandler::new(self.repository.clone()),
            ));

            // A stopped predecessor may have recorded where to pick up.
            let restart_state = {
                let mut job_execution = execution.write().await;
                job_execution
                    .execution_context
                    .remove(RESTART_STATE_KEY)
                    .and_then(|value| value.as_str().map(str::to_string))
            };
            let flow_result = match &restart_state {
                Some(state_name) => {
                    log::info!(
                        "job '{}' resuming at state '{state_name}' after a stop",
                        self.name
                    );
                    self.flow.resume(state_name, &executor).await
                }
                None => self.flow.start(&executor).await,
            };

            let (status, exit_status) = match &flow_result {
                Ok(flow_execution) => (
                    flow_execution.status.batch_status(),
                    ExitStatus::new(flow_execution.status.name()),
                ),
                Err(error) => match error.current_context() {
                    BatchError::JobInterrupted | BatchError::StepInterrupted(_) => {
                        (BatchStatus::Stopped, ExitStatus::stopped())
                    }
                    BatchError::Repository => (
                        BatchStatus::Unknown,
                        ExitStatus::unknown().add_exit_description(
                            "meta-data update failed; execution must not be restarted automatically",
                        ),
                    ),
                    BatchError::NoSuchJob(_) => (
                        BatchStatus::Failed,
                        ExitStatus::with_description("NO_SUCH_JOB", error.to_string()),
                    ),
                    _ => (
                        BatchStatus::Failed,
                        ExitStatus::failed().add_error_description(error),
                    ),
                },
            };

            {
                let mut job_execution = execution.write().await;
                job_execution.upgrade_status(status);
                job_execution.exit_status = exit_status;
                if let Err(error) = &flow_result {
                    job_execution.add_failure_exception(format!("{error:?}"));
                }
            }

            for listener in self.listeners.iter().rev() {
                listener.after_job(execution).await;
            }

            execution.write().await.end_time = Some(Utc::now());
            if let Err(persist_error) = self.repository.update_job_execution(execution).await {
                let mut job_execution = execution.write().await;
                job_execution.status = BatchStatus::Unknown;
                job_execution.exit_status =
                    job_execution.exit_status.and(&ExitStatus::unknown());
                log::error!(
                    "failed to persist final state of job '{}': {persist_error:?}",
                    self.name
                );
                return Err(persist_error.change_context(BatchError::Repository));
            }

            log::info!(
                "job '{}' ended with status {}",
                self.name,
                execution.read().await.status
            );
            flow_result.map(|_| ())
        }
        .boxed()
    }
}
