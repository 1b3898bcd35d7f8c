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

//! Execution meta-data: job instances, job executions, step executions and
//! per-chunk contributions.
//!
//! Executions are mutated from several tasks (split branches, chunk drivers,
//! the repository), so they are shared as `Arc<tokio::sync::RwLock<_>>`
//! handles. Lock scopes are kept short; no await happens while a lock is
//! held except the nested step-execution writes in [`JobExecution::stop`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::exit_status::ExitStatus;
use crate::parameters::JobParameters;
use crate::status::BatchStatus;

pub type SharedJobExecution = Arc<RwLock<JobExecution>>;
pub type SharedStepExecution = Arc<RwLock<StepExecution>>;

/// Identity of a logical job run: a job name plus its identifying
/// parameters. Created once; only the version is ever bumped.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: Uuid,
    pub job_name: String,
    pub parameters: JobParameters,
    pub version: u64,
}

impl JobInstance {
    pub fn new(job_name: impl Into<String>, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            parameters,
            version: 0,
        }
    }
}

/// One attempt at a [`JobInstance`]. Owns the step executions created during
/// the run. Mutated throughout; immutable once terminal and persisted.
#[derive(Debug)]
pub struct JobExecution {
    pub id: Uuid,
    pub instance: JobInstance,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub version: u64,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    step_executions: Vec<SharedStepExecution>,
    failure_exceptions: Vec<String>,
}

impl JobExecution {
    pub fn new(instance: JobInstance) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            version: 0,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
            failure_exceptions: Vec::new(),
        }
    }

    /// Register a new step execution under this job execution and return the
    /// shared handle.
    pub fn add_step_execution(&mut self, step_execution: StepExecution) -> SharedStepExecution {
        let handle = Arc::new(RwLock::new(step_execution));
        self.step_executions.push(handle.clone());
        handle
    }

    pub fn step_executions(&self) -> &[SharedStepExecution] {
        &self.step_executions
    }

    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Running means started and not yet finished.
    pub fn is_running(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_none()
    }

    pub fn is_stopping(&self) -> bool {
        self.status == BatchStatus::Stopping
    }

    /// Request a cooperative stop: mark the execution `Stopping` and flag
    /// every running step execution terminate-only. Steps observe the flag
    /// between chunk iterations and states observe it between transitions.
    pub async fn stop(&mut self) {
        self.upgrade_status(BatchStatus::Stopping);
        for step_execution in &self.step_executions {
            let mut step_execution = step_execution.write().await;
            if step_execution.status.is_running() {
                step_execution.set_terminate_only();
            }
        }
    }

    pub fn add_failure_exception(&mut self, description: impl Into<String>) {
        self.failure_exceptions.push(description.into());
    }

    pub fn failure_exceptions(&self) -> &[String] {
        &self.failure_exceptions
    }
}

/// Collect the job-level failure causes plus those of every step execution.
pub async fn all_failure_exceptions(job_execution: &SharedJobExecution) -> Vec<String> {
    let job_execution = job_execution.read().await;
    let mut failures = job_execution.failure_exceptions.clone();
    for step_execution in &job_execution.step_executions {
        failures.extend(step_execution.read().await.failure_exceptions.iter().cloned());
    }
    failures
}

/// One attempt at a named step within a job execution. A step restarted
/// after failure gets a new `StepExecution` with the same logical identity
/// (step name + instance), so history accumulates.
#[derive(Debug)]
pub struct StepExecution {
    pub id: Uuid,
    pub step_name: String,
    pub job_execution_id: Uuid,
    pub job_instance_id: Uuid,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub version: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub write_skip_count: u64,
    pub process_skip_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub execution_context: ExecutionContext,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    terminate_only: bool,
    failure_exceptions: Vec<String>,
}

impl StepExecution {
    pub fn new(step_name: impl Into<String>, job_execution: &JobExecution) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_name: step_name.into(),
            job_execution_id: job_execution.id,
            job_instance_id: job_execution.instance.id,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            version: 0,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            write_skip_count: 0,
            process_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            execution_context: ExecutionContext::new(),
            start_time: None,
            end_time: None,
            last_updated: None,
            terminate_only: false,
            failure_exceptions: Vec::new(),
        }
    }

    /// Fold a per-chunk contribution into the counters and exit status.
    ///
    /// Contributions are accumulated by workers but only ever applied here,
    /// on the driving task, under this execution's own lock.
    pub fn apply(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.write_skip_count += contribution.write_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.exit_status = self.exit_status.and(&contribution.exit_status);
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.write_skip_count + self.process_skip_count
    }

    pub fn increment_commit_count(&mut self) {
        self.commit_count += 1;
    }

    pub fn increment_rollback_count(&mut self) {
        self.rollback_count += 1;
    }

    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Flag this execution for cooperative termination. Polled by the chunk
    /// driver between iterations; work already in flight runs to completion.
    pub fn set_terminate_only(&mut self) {
        self.terminate_only = true;
    }

    pub fn is_terminate_only(&self) -> bool {
        self.terminate_only
    }

    pub fn add_failure_exception(&mut self, description: impl Into<String>) {
        self.failure_exceptions.push(description.into());
    }

    pub fn failure_exceptions(&self) -> &[String] {
        &self.failure_exceptions
    }
}

/// Delta produced by one chunk: counters plus a contributed exit status.
/// Workers mutate a contribution privately; the driver applies it to the
/// step execution when the chunk completes.
#[derive(Debug, Clone)]
pub struct StepContribution {
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub write_skip_count: u64,
    pub process_skip_count: u64,
    pub exit_status: ExitStatus,
}

impl StepContribution {
    pub fn new() -> Self {
        Self {
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            write_skip_count: 0,
            process_skip_count: 0,
            exit_status: ExitStatus::executing(),
        }
    }

    pub fn increment_read_count(&mut self) {
        self.read_count += 1;
    }

    pub fn increment_write_count(&mut self, count: u64) {
        self.write_count += count;
    }

    pub fn increment_filter_count(&mut self) {
        self.filter_count += 1;
    }

    pub fn increment_read_skip_count(&mut self) {
        self.read_skip_count += 1;
    }

    pub fn increment_write_skip_count(&mut self) {
        self.write_skip_count += 1;
    }

    pub fn increment_process_skip_count(&mut self) {
        self.process_skip_count += 1;
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.write_skip_count + self.process_skip_count
    }

    pub fn set_exit_status(&mut self, exit_status: ExitStatus) {
        self.exit_status = exit_status;
    }
}

impl Default for StepContribution {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::JobParametersBuilder;

    fn job_execution() -> JobExecution {
        let params = JobParametersBuilder::new().add("input", "a.csv").build();
        JobExecution::new(JobInstance::new("import", params))
    }

    #[test]
    fn test_apply_contribution_folds_counters() {
        let job = job_execution();
        let mut step = StepExecution::new("load", &job);
        let mut contribution = StepContribution::new();
        contribution.increment_read_count();
        contribution.increment_read_count();
        contribution.increment_write_count(2);
        contribution.increment_read_skip_count();
        step.apply(&contribution);
        step.apply(&contribution);
        assert_eq!(step.read_count, 4);
        assert_eq!(step.write_count, 4);
        assert_eq!(step.read_skip_count, 2);
        assert_eq!(step.skip_count(), 2);
    }

    #[test]
    fn test_contribution_exit_status_combines() {
        let job = job_execution();
        let mut step = StepExecution::new("load", &job);
        let mut contribution = StepContribution::new();
        contribution.set_exit_status(ExitStatus::failed());
        step.apply(&contribution);
        assert_eq!(step.exit_status.exit_code(), "FAILED");
    }

    #[tokio::test]
    async fn test_stop_flags_running_steps() {
        let mut job = job_execution();
        let step = {
            let mut step = StepExecution::new("load", &job);
            step.status = BatchStatus::Started;
            job.add_step_execution(step)
        };
        job.stop().await;
        assert_eq!(job.status, BatchStatus::Stopping);
        assert!(step.read().await.is_terminate_only());
    }
}
