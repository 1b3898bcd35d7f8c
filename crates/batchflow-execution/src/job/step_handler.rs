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

use error_stack::{report, ResultExt as _};

use batchflow_core::{
    BatchError, BatchStatus, Result, SharedJobExecution, SharedStepExecution, StepExecution,
};
use batchflow_state::JobRepository;

use crate::step::Step;

/// Decides whether and how a step runs within a job execution: restart
/// rules, start limits, step-execution row creation, and propagation of
/// cooperative stop signals.
pub struct StepHandler {
    repository: Arc<dyn JobRepository>,
}

impl StepHandler {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    /// Handle one step under the given job execution.
    ///
    /// Returns the step execution that represents the step's outcome for
    /// this run — a freshly executed one, or the prior completed one when
    /// the step is skipped on restart (in which case no new row is
    /// created and history stands as it was).
    pub async fn handle_step(
        &self,
        step: &Arc<dyn Step>,
        job_execution: &SharedJobExecution,
    ) -> Result<SharedStepExecution> {
        if job_execution.read().await.is_stopping() {
            return Err(report!(BatchError::JobInterrupted)
                .attach_printable("job execution was stopping before the step started"));
        }

        let (job_execution_id, job_instance_id) = {
            let job_execution = job_execution.read().await;
            (job_execution.id, job_execution.instance.id)
        };

        let last_step_execution = self
            .repository
            .last_step_execution(job_instance_id, step.name())
            .await
            .change_context(BatchError::Repository)?;
        // A step execution created by this very run (e.g. a loop through a
        // decision) is not restart history.
        let last_step_execution = match last_step_execution {
            Some(candidate) => {
                if candidate.read().await.job_execution_id == job_execution_id {
                    None
                } else {
                    Some(candidate)
                }
            }
            None => None,
        };

        let last_status = match &last_step_execution {
            Some(step_execution) => step_execution.read().await.status,
            None => BatchStatus::Starting,
        };

        if last_status == BatchStatus::Unknown {
            return Err(report!(BatchError::JobRestart(format!(
                "step '{}' is in UNKNOWN status; its stored state is not trusted and it \
                 cannot be restarted automatically",
                step.name()
            ))));
        }

        if (last_status == BatchStatus::Completed && !step.allow_start_if_complete())
            || last_status == BatchStatus::Abandoned
        {
            // Already successful: do not re-execute, do not create a new row.
            log::info!(
                "step '{}' already completed for this instance, skipping",
                step.name()
            );
            let prior = last_step_execution
                .ok_or_else(|| report!(BatchError::JobRestart(format!(
                    "step '{}' reported complete but has no prior execution",
                    step.name()
                ))))?;
            return Ok(prior);
        }

        let executed_count = self
            .repository
            .step_execution_count(job_instance_id, step.name())
            .await
            .change_context(BatchError::Repository)?;
        if executed_count >= step.start_limit() {
            return Err(report!(BatchError::StartLimitExceeded {
                step: step.name().to_string(),
                limit: step.start_limit(),
            }));
        }

        let mut step_execution = {
            let job_execution = job_execution.read().await;
            StepExecution::new(step.name(), &job_execution)
        };
        // On restart of an unsuccessful step, resume from its checkpoint.
        if let Some(last) = &last_step_execution {
            let last = last.read().await;
            if last.status != BatchStatus::Completed {
                step_execution.execution_context.merge(&last.execution_context);
                step_execution.execution_context.clear_dirty();
            }
        }

        let step_execution = self
            .repository
            .add_step_execution(job_execution, step_execution)
            .await
            .change_context(BatchError::Repository)?;

        let result = step.execute(job_execution, &step_execution).await;
        match result {
            Err(error)
                if matches!(
                    error.current_context(),
                    BatchError::StepInterrupted(_) | BatchError::JobInterrupted
                ) =>
            {
                job_execution.write().await.upgrade_status(BatchStatus::Stopping);
                return Err(error);
            }
            Err(error) => return Err(error),
            Ok(()) => {}
        }

        // A step that stopped without raising still interrupts the job.
        let step_status = step_execution.read().await.status;
        if step_status == BatchStatus::Stopping || step_status == BatchStatus::Stopped {
            job_execution.write().await.upgrade_status(BatchStatus::Stopping);
            return Err(report!(BatchError::JobInterrupted)
                .attach_printable(format!("job interrupted by step '{}'", step.name())));
        }

        Ok(step_execution)
    }
}
