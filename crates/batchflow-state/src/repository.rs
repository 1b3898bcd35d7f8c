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

use batchflow_core::{JobParameters, SharedJobExecution, SharedStepExecution, StepExecution};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::Result;

/// Contract for durably recording job and step executions.
///
/// Implementations must be thread-safe. Update methods perform an
/// optimistic-concurrency check: if the stored version no longer matches the
/// caller's copy, they fail with
/// [`OptimisticLock`](crate::RepositoryError::OptimisticLock), which the
/// engine treats as non-retryable for that execution.
pub trait JobRepository: Send + Sync {
    /// Find or create the job instance for `(job_name, identifying
    /// parameters)` and open a new execution for it.
    ///
    /// Enforces restart eligibility: fails if an execution for the instance
    /// is still running, if the instance already completed, or if prior
    /// executions exist and the job is not restartable. On a legal restart
    /// the new execution carries forward the previous execution context.
    fn create_job_execution<'a>(
        &'a self,
        job_name: &'a str,
        parameters: &'a JobParameters,
        restartable: bool,
    ) -> BoxFuture<'a, Result<SharedJobExecution>>;

    /// Persist the current state of a job execution (version check + bump).
    fn update_job_execution<'a>(
        &'a self,
        execution: &'a SharedJobExecution,
    ) -> BoxFuture<'a, Result<()>>;

    /// Persist a new step execution row under the given job execution and
    /// return the shared handle registered with it.
    fn add_step_execution<'a>(
        &'a self,
        job_execution: &'a SharedJobExecution,
        step_execution: StepExecution,
    ) -> BoxFuture<'a, Result<SharedStepExecution>>;

    /// Persist the current state of a step execution (version check + bump),
    /// serialized per step-execution id.
    fn update_step_execution<'a>(
        &'a self,
        execution: &'a SharedStepExecution,
    ) -> BoxFuture<'a, Result<()>>;

    /// Persist the step execution's checkpoint context.
    fn update_execution_context<'a>(
        &'a self,
        execution: &'a SharedStepExecution,
    ) -> BoxFuture<'a, Result<()>>;

    /// The most recent execution of the instance identified by
    /// `(job_name, identifying parameters)`, if any.
    fn last_job_execution<'a>(
        &'a self,
        job_name: &'a str,
        parameters: &'a JobParameters,
    ) -> BoxFuture<'a, Result<Option<SharedJobExecution>>>;

    /// The most recent execution of the named step across all executions of
    /// the given job instance.
    fn last_step_execution<'a>(
        &'a self,
        job_instance_id: Uuid,
        step_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<SharedStepExecution>>>;

    /// How many times the named step has been executed for the instance.
    fn step_execution_count<'a>(
        &'a self,
        job_instance_id: Uuid,
        step_name: &'a str,
    ) -> BoxFuture<'a, Result<usize>>;
}
