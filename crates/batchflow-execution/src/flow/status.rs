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

use batchflow_core::BatchStatus;
use serde::{Deserialize, Serialize};

/// Severity classification of a flow status name, by prefix: a custom name
/// like `"FAILED.TIMEOUT"` classifies as failed. Names with no recognized
/// prefix classify as completed (they are business outcomes used for
/// branching, not failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StatusClass {
    Completed,
    Stopped,
    Failed,
    Unknown,
}

/// Outcome of a state or flow, used to pick transitions and the terminal
/// job status. Ordered by severity class then name, so aggregating a set of
/// branch outcomes with `max` keeps the most severe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowExecutionStatus {
    name: String,
}

impl FlowExecutionStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn completed() -> Self {
        Self::new("COMPLETED")
    }

    pub fn stopped() -> Self {
        Self::new("STOPPED")
    }

    pub fn failed() -> Self {
        Self::new("FAILED")
    }

    pub fn unknown() -> Self {
        Self::new("UNKNOWN")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> StatusClass {
        if self.name.starts_with("STOPPED") {
            StatusClass::Stopped
        } else if self.name.starts_with("FAILED") {
            StatusClass::Failed
        } else if self.name.starts_with("UNKNOWN") {
            StatusClass::Unknown
        } else {
            StatusClass::Completed
        }
    }

    pub fn is_stop(&self) -> bool {
        self.class() == StatusClass::Stopped
    }

    pub fn is_fail(&self) -> bool {
        self.class() == StatusClass::Failed
    }

    /// The coarse status this outcome maps to at the job level.
    pub fn batch_status(&self) -> BatchStatus {
        match self.class() {
            StatusClass::Completed => BatchStatus::Completed,
            StatusClass::Stopped => BatchStatus::Stopped,
            StatusClass::Failed => BatchStatus::Failed,
            StatusClass::Unknown => BatchStatus::Unknown,
        }
    }
}

impl PartialOrd for FlowExecutionStatus {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlowExecutionStatus {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.class()
            .cmp(&other.class())
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl std::fmt::Display for FlowExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Terminal record of one flow run: the last state reached and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowExecution {
    pub state_name: String,
    pub status: FlowExecutionStatus,
}

impl FlowExecution {
    pub fn new(state_name: impl Into<String>, status: FlowExecutionStatus) -> Self {
        Self {
            state_name: state_name.into(),
            status,
        }
    }
}
