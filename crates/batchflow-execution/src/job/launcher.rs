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

use error_stack::ResultExt as _;

use batchflow_core::{BatchError, JobParameters, Result, SharedJobExecution};
use batchflow_state::{JobRepository, RepositoryError};

use super::Job;

/// Front door for running a job: opens the execution through the
/// repository (which enforces restart eligibility) and hands it to the job.
///
/// The returned execution carries the outcome; a job that fails its steps
/// still returns `Ok` here, with the failure recorded on the execution.
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
}

impl JobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    pub async fn run(
        &self,
        job: &dyn Job,
        parameters: &JobParameters,
    ) -> Result<SharedJobExecution> {
        let execution = self
            .repository
            .create_job_execution(job.name(), parameters, job.is_restartable())
            .await
            .map_err(|error| match error.current_context() {
                RepositoryError::JobExecutionAlreadyRunning { .. }
                | RepositoryError::JobInstanceAlreadyComplete { .. }
                | RepositoryError::JobRestartNotAllowed { .. } => {
                    error.change_context(BatchError::JobRestart(job.name().to_string()))
                }
                _ => error.change_context(BatchError::Repository),
            })?;

        if let Err(error) = job.execute(&execution).await {
            log::error!("job '{}' raised: {error:?}", job.name());
        }
        Ok(execution)
    }
}
