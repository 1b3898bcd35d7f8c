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

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt as _;

use batchflow_core::{BatchStatus, Result, SharedJobExecution, SharedStepExecution};

use super::status::{FlowExecution, FlowExecutionStatus};
use crate::job::StepHandler;
use crate::step::Step;

/// What a [`State`](super::State) can reach while the flow runs: step
/// execution, the owning job execution, and the cooperative stop signal.
pub trait FlowExecutor: Send + Sync {
    /// Execute a step under the current job execution and return its
    /// outcome as a flow status (the step's exit code).
    fn execute_step<'a>(
        &'a self,
        step: Arc<dyn Step>,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus>>;

    fn job_execution(&self) -> SharedJobExecution;

    /// The most recent step execution handled by this executor, if any.
    fn last_step_execution(&self) -> Option<SharedStepExecution>;

    /// Checked by the flow driver between states.
    fn is_stopping(&self) -> BoxFuture<'_, bool>;

    /// Called once when a flow run reaches its terminal record.
    fn close<'a>(&'a self, flow_execution: &'a FlowExecution) -> BoxFuture<'a, ()>;
}

/// The job-backed executor: delegates step execution to the
/// [`StepHandler`] (restart rules, persistence) and exposes the shared job
/// execution to states.
pub struct JobFlowExecutor {
    job_execution: SharedJobExecution,
    step_handler: StepHandler,
    last_step_execution: Mutex<Option<SharedStepExecution>>,
}

impl JobFlowExecutor {
    pub fn new(job_execution: SharedJobExecution, step_handler: StepHandler) -> Self {
        Self {
            job_execution,
            step_handler,
            last_step_execution: Mutex::new(None),
        }
    }
}

impl FlowExecutor for JobFlowExecutor {
    fn execute_step<'a>(
        &'a self,
        step: Arc<dyn Step>,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus>> {
        async move {
            let step_execution = self
                .step_handler
                .handle_step(&step, &self.job_execution)
                .await?;
            let exit_code = {
                let step_execution = step_execution.read().await;
                step_execution.exit_status.exit_code().to_string()
            };
            let mut last = self
                .last_step_execution
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *last = Some(step_execution);
            Ok(FlowExecutionStatus::new(exit_code))
        }
        .boxed()
    }

    fn job_execution(&self) -> SharedJobExecution {
        self.job_execution.clone()
    }

    fn last_step_execution(&self) -> Option<SharedStepExecution> {
        self.last_step_execution
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn is_stopping(&self) -> BoxFuture<'_, bool> {
        async move {
            if self.job_execution.read().await.is_stopping() {
                return true;
            }
            // An execution in UNKNOWN state means the stored meta-data is no
            // longer trusted; driving further states would compound the
            // damage, so it is a stop condition in its own right.
            if let Some(step_execution) = self.last_step_execution() {
                return step_execution.read().await.status == BatchStatus::Unknown;
            }
            false
        }
        .boxed()
    }

    fn close<'a>(&'a self, flow_execution: &'a FlowExecution) -> BoxFuture<'a, ()> {
        async move {
            log::debug!(
                "flow finished at state '{}' with status {}",
                flow_execution.state_name,
                flow_execution.status
            );
        }
        .boxed()
    }
}
