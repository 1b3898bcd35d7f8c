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

//! State variants of the flow graph.

use std::sync::Arc;

use error_stack::ResultExt as _;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt as _};
use futures::FutureExt as _;

use batchflow_core::{BatchError, JobExecution, Result, StepExecution};

use super::executor::FlowExecutor;
use super::status::FlowExecutionStatus;
use super::Flow;
use crate::step::Step;

/// Execution-context key under which a stopped end state records where a
/// restarted execution should resume.
pub const RESTART_STATE_KEY: &str = "batchflow.restart";

/// One node of a flow graph.
pub trait State: Send + Sync {
    fn name(&self) -> &str;

    /// Terminal states end the flow as soon as they are handled.
    fn is_end_state(&self) -> bool {
        false
    }

    /// Names of the steps reachable from this state, for job-level
    /// reporting. Nested flows flatten into the parent listing.
    fn step_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn handle<'a>(
        &'a self,
        executor: &'a Arc<dyn FlowExecutor>,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus>>;
}

/// Wraps a [`Step`]; the state's outcome is the step's exit code.
pub struct StepState {
    name: String,
    step: Arc<dyn Step>,
}

impl StepState {
    pub fn new(step: Arc<dyn Step>) -> Self {
        Self {
            name: step.name().to_string(),
            step,
        }
    }
}

impl State for StepState {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_names(&self) -> Vec<String> {
        vec![self.step.name().to_string()]
    }

    fn handle<'a>(
        &'a self,
        executor: &'a Arc<dyn FlowExecutor>,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus>> {
        async move { executor.execute_step(self.step.clone()).await }.boxed()
    }
}

/// Content-based branching that does not correspond to a step.
pub trait JobExecutionDecider: Send + Sync {
    fn decide(
        &self,
        job_execution: &JobExecution,
        step_execution: Option<&StepExecution>,
    ) -> Result<FlowExecutionStatus>;
}

impl<F> JobExecutionDecider for F
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> Result<FlowExecutionStatus> + Send + Sync,
{
    fn decide(
        &self,
        job_execution: &JobExecution,
        step_execution: Option<&StepExecution>,
    ) -> Result<FlowExecutionStatus> {
        (self)(job_execution, step_execution)
    }
}

/// Delegates its outcome to a [`JobExecutionDecider`]. A decider error is
/// fatal to the flow — it surfaces as a failed job, never as a branch
/// outcome.
pub struct DecisionState {
    name: String,
    decider: Arc<dyn JobExecutionDecider>,
}

impl DecisionState {
    pub fn new(name: impl Into<String>, decider: Arc<dyn JobExecutionDecider>) -> Self {
        Self {
            name: name.into(),
            decider,
        }
    }
}

impl State for DecisionState {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(
        &'a self,
        executor: &'a Arc<dyn FlowExecutor>,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus>> {
        async move {
            let last_step_execution = executor.last_step_execution();
            let job_execution = executor.job_execution();
            let job_execution = job_execution.read().await;
            let status = match &last_step_execution {
                Some(step_execution) => {
                    let step_execution = step_execution.read().await;
                    self.decider.decide(&job_execution, Some(&step_execution))
                }
                None => self.decider.decide(&job_execution, None),
            };
            status.change_context_lazy(|| BatchError::Decider(self.name.clone()))
        }
        .boxed()
    }
}

/// Runs its sub-flows concurrently and aggregates the branch outcomes by
/// severity: failed if any branch failed, else stopped if any stopped, else
/// the most severe of the rest. Aggregation is commutative, so branch
/// completion order does not matter.
pub struct SplitState {
    name: String,
    flows: Vec<Arc<Flow>>,
}

impl SplitState {
    pub fn new(name: impl Into<String>, flows: Vec<Arc<Flow>>) -> Self {
        Self {
            name: name.into(),
            flows,
        }
    }
}

impl State for SplitState {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_names(&self) -> Vec<String> {
        self.flows.iter().flat_map(|flow| flow.step_names()).collect()
    }

    fn handle<'a>(
        &'a self,
        executor: &'a Arc<dyn FlowExecutor>,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus>> {
        async move {
            let mut branches: FuturesUnordered<_> = self
                .flows
                .iter()
                .map(|flow| {
                    let flow = flow.clone();
                    let executor = executor.clone();
                    async move { flow.start(&executor).await }
                })
                .collect();

            // Wait for every branch; hold the first error until all have
            // finished so no branch outcome is lost.
            let mut statuses = Vec::with_capacity(self.flows.len());
            let mut first_error = None;
            while let Some(branch_result) = branches.next().await {
                match branch_result {
                    Ok(flow_execution) => statuses.push(flow_execution.status),
                    Err(error) => {
                        statuses.push(FlowExecutionStatus::failed());
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                }
            }
            if let Some(error) = first_error {
                return Err(error);
            }
            Ok(statuses
                .into_iter()
                .max()
                .unwrap_or_else(FlowExecutionStatus::unknown))
        }
        .boxed()
    }
}

/// Runs a nested flow as a single state, exposing its terminal status to
/// the parent graph.
pub struct FlowState {
    name: String,
    flow: Arc<Flow>,
}

impl FlowState {
    pub fn new(name: impl Into<String>, flow: Arc<Flow>) -> Self {
        Self {
            name: name.into(),
            flow,
        }
    }
}

impl State for FlowState {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_names(&self) -> Vec<String> {
        self.flow.step_names()
    }

    fn handle<'a>(
        &'a self,
        executor: &'a Arc<dyn FlowExecutor>,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus>> {
        async move {
            let flow_execution = self.flow.start(executor).await?;
            Ok(flow_execution.status)
        }
        .boxed()
    }
}

/// Terminal state carrying a fixed status. A stopped end optionally names
/// the state a restarted execution should resume from; the name is recorded
/// in the job's execution context and picked up by the job on restart.
pub struct EndState {
    name: String,
    status: FlowExecutionStatus,
    restart_state: Option<String>,
}

impl EndState {
    pub fn completed(name: impl Into<String>) -> Self {
        Self::new(name, FlowExecutionStatus::completed())
    }

    pub fn failed(name: impl Into<String>) -> Self {
        Self::new(name, FlowExecutionStatus::failed())
    }

    pub fn stopped(name: impl Into<String>) -> Self {
        Self::new(name, FlowExecutionStatus::stopped())
    }

    pub fn stopped_with_restart(name: impl Into<String>, restart_state: impl Into<String>) -> Self {
        let mut state = Self::new(name, FlowExecutionStatus::stopped());
        state.restart_state = Some(restart_state.into());
        state
    }

    pub fn new(name: impl Into<String>, status: FlowExecutionStatus) -> Self {
        Self {
            name: name.into(),
            status,
            restart_state: None,
        }
    }
}

impl State for EndState {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_end_state(&self) -> bool {
        true
    }

    fn handle<'a>(
        &'a self,
        executor: &'a Arc<dyn FlowExecutor>,
    ) -> BoxFuture<'a, Result<FlowExecutionStatus>> {
        async move {
            if self.status.is_stop() {
                let job_execution = executor.job_execution();
                let mut job_execution = job_execution.write().await;
                if let Some(restart_state) = &self.restart_state {
                    job_execution
                        .execution_context
                        .put(RESTART_STATE_KEY, restart_state.clone());
                }
            }
            Ok(self.status.clone())
        }
        .boxed()
    }
}
