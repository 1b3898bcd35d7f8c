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

//! The flow state machine: a graph of [`State`]s connected by
//! pattern-matched [`StateTransition`]s, driven from a start state to an
//! end state.

pub mod executor;
pub mod state;
pub mod status;
pub mod transition;

pub use executor::{FlowExecutor, JobFlowExecutor};
pub use state::{
    DecisionState, EndState, FlowState, JobExecutionDecider, SplitState, State, StepState,
    RESTART_STATE_KEY,
};
pub use status::{FlowExecution, FlowExecutionStatus};
pub use transition::StateTransition;

use std::collections::HashMap;
use std::sync::Arc;

use error_stack::report;

use batchflow_core::{BatchError, Result};

use crate::step::Step;

/// A named graph of states. Transitions out of each state are kept sorted
/// most-specific-first, so resolution prefers an exact outcome match over a
/// wildcard. Constructed through [`FlowBuilder`], which validates the graph
/// eagerly.
pub struct Flow {
    name: String,
    states: HashMap<String, Arc<dyn State>>,
    transitions: HashMap<String, Vec<StateTransition>>,
    start_state: String,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .field("start_state", &self.start_state)
            .finish()
    }
}

impl Flow {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of all steps in the graph, nested flows and splits flattened.
    pub fn step_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for state in self.states.values() {
            names.extend(state.step_names());
        }
        names
    }

    /// Run the flow from its start state.
    pub async fn start(&self, executor: &Arc<dyn FlowExecutor>) -> Result<FlowExecution> {
        self.resume(&self.start_state.clone(), executor).await
    }

    /// Run the flow from the named state (controlled restart-after-stop).
    pub async fn resume(
        &self,
        state_name: &str,
        executor: &Arc<dyn FlowExecutor>,
    ) -> Result<FlowExecution> {
        let mut state = self.states.get(state_name).ok_or_else(|| {
            report!(BatchError::FlowConfiguration(format!(
                "no state named '{state_name}' in flow '{}'",
                self.name
            )))
        })?;

        let mut status;
        loop {
            log::debug!("flow '{}' handling state '{}'", self.name, state.name());
            status = match state.handle(executor).await {
                Ok(status) => status,
                Err(error) => {
                    executor
                        .close(&FlowExecution::new(
                            state.name(),
                            FlowExecutionStatus::unknown(),
                        ))
                        .await;
                    return Err(error);
                }
            };
            if state.is_end_state() {
                break;
            }
            // Cooperative interruption is observed between states, never
            // preemptively inside a running one.
            if executor.is_stopping().await {
                status = FlowExecutionStatus::stopped();
                break;
            }
            state = self.next_state(state.name(), &status)?;
        }

        let flow_execution = FlowExecution::new(state.name(), status);
        executor.close(&flow_execution).await;
        Ok(flow_execution)
    }

    /// Resolve the state to run after `state_name` produced `status`. No
    /// matching transition is a fatal configuration error, surfaced
    /// immediately.
    fn next_state(
        &self,
        state_name: &str,
        status: &FlowExecutionStatus,
    ) -> Result<&Arc<dyn State>> {
        let transitions = self.transitions.get(state_name).ok_or_else(|| {
            report!(BatchError::FlowConfiguration(format!(
                "no transitions out of state '{state_name}' in flow '{}'",
                self.name
            )))
        })?;
        let matched = transitions
            .iter()
            .find(|transition| transition.matches(status.name()))
            .ok_or_else(|| {
                report!(BatchError::FlowConfiguration(format!(
                    "no transition out of state '{state_name}' matches outcome '{}' in flow '{}'",
                    status.name(),
                    self.name
                )))
            })?;
        self.states.get(&matched.next).ok_or_else(|| {
            report!(BatchError::FlowConfiguration(format!(
                "transition from '{state_name}' targets missing state '{}' in flow '{}'",
                matched.next, self.name
            )))
        })
    }
}

/// Assembles and validates a [`Flow`].
pub struct FlowBuilder {
    name: String,
    states: Vec<Arc<dyn State>>,
    transitions: Vec<StateTransition>,
    start_state: Option<String>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            transitions: Vec::new(),
            start_state: None,
        }
    }

    /// Add a step as a state named after the step.
    pub fn step(self, step: Arc<dyn Step>) -> Self {
        self.state(Arc::new(StepState::new(step)))
    }

    pub fn decision(self, name: impl Into<String>, decider: Arc<dyn JobExecutionDecider>) -> Self {
        self.state(Arc::new(DecisionState::new(name, decider)))
    }

    pub fn split(self, name: impl Into<String>, flows: Vec<Arc<Flow>>) -> Self {
        self.state(Arc::new(SplitState::new(name, flows)))
    }

    pub fn flow(self, name: impl Into<String>, flow: Arc<Flow>) -> Self {
        self.state(Arc::new(FlowState::new(name, flow)))
    }

    pub fn end(self, name: impl Into<String>) -> Self {
        self.state(Arc::new(EndState::completed(name)))
    }

    pub fn fail(self, name: impl Into<String>) -> Self {
        self.state(Arc::new(EndState::failed(name)))
    }

    pub fn stop(self, name: impl Into<String>) -> Self {
        self.state(Arc::new(EndState::stopped(name)))
    }

    pub fn stop_and_restart(
        self,
        name: impl Into<String>,
        restart_state: impl Into<String>,
    ) -> Self {
        self.state(Arc::new(EndState::stopped_with_restart(name, restart_state)))
    }

    pub fn state(mut self, state: Arc<dyn State>) -> Self {
        self.states.push(state);
        self
    }

    /// Route `from`'s outcomes matching `pattern` to the state named `to`.
    pub fn transition(
        mut self,
        from: impl Into<String>,
        pattern: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.transitions
            .push(StateTransition::new(from, pattern, to));
        self
    }

    pub fn start_state(mut self, name: impl Into<String>) -> Self {
        self.start_state = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Flow> {
        let mut states: HashMap<String, Arc<dyn State>> = HashMap::new();
        for state in self.states {
            if states.insert(state.name().to_string(), state.clone()).is_some() {
                return Err(report!(BatchError::FlowConfiguration(format!(
                    "duplicate state name '{}' in flow '{}'",
                    state.name(),
                    self.name
                ))));
            }
        }

        let mut transitions: HashMap<String, Vec<StateTransition>> = HashMap::new();
        for transition in self.transitions {
            if !states.contains_key(&transition.state_name) {
                return Err(report!(BatchError::FlowConfiguration(format!(
                    "transition out of unknown state '{}' in flow '{}'",
                    transition.state_name, self.name
                ))));
            }
            if !states.contains_key(&transition.next) {
                return Err(report!(BatchError::FlowConfiguration(format!(
                    "transition targets unknown state '{}' in flow '{}'",
                    transition.next, self.name
                ))));
            }
            transitions
                .entry(transition.state_name.clone())
                .or_default()
                .push(transition);
        }
        for state_transitions in transitions.values_mut() {
            state_transitions.sort();
        }

        if !states.values().any(|state| state.is_end_state()) {
            return Err(report!(BatchError::FlowConfiguration(format!(
                "flow '{}' has no end state",
                self.name
            ))));
        }

        let start_state = match self.start_state {
            Some(name) => {
                if !states.contains_key(&name) {
                    return Err(report!(BatchError::FlowConfiguration(format!(
                        "start state '{name}' does not exist in flow '{}'",
                        self.name
                    ))));
                }
                name
            }
            None => {
                // The unique state with no incoming transition.
                let mut candidates: Vec<&String> = states
                    .keys()
                    .filter(|name| {
                        !transitions
                            .values()
                            .flatten()
                            .any(|transition| &&transition.next == name)
                    })
                    .filter(|name| {
                        !states
                            .get(*name)
                            .map(|state| state.is_end_state())
                            .unwrap_or(false)
                    })
                    .collect();
                candidates.sort();
                match candidates.as_slice() {
                    [single] => (*single).clone(),
                    [] => {
                        return Err(report!(BatchError::FlowConfiguration(format!(
                            "no start state could be located in flow '{}'",
                            self.name
                        ))))
                    }
                    multiple => {
                        return Err(report!(BatchError::FlowConfiguration(format!(
                            "multiple possible start states {multiple:?} in flow '{}'; \
                             set one explicitly",
                            self.name
                        ))))
                    }
                }
            }
        };

        Ok(Flow {
            name: self.name,
            states,
            transitions,
            start_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_rejects_unknown_transition_target() {
        let result = Flow::builder("f")
            .end("done")
            .transition("done", "*", "missing")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_requires_an_end_state() {
        let result = Flow::builder("f").build();
        assert!(matches!(
            result.unwrap_err().current_context(),
            BatchError::FlowConfiguration(_)
        ));
    }
}
