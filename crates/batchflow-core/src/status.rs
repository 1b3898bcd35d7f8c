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

use serde::{Deserialize, Serialize};

/// Coarse status of a job or step execution.
///
/// Variants are declared in ascending severity order, so the derived `Ord`
/// is the severity ordering: `Completed` is least severe and `Failed`,
/// `Abandoned` and `Unknown` are maximal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Execution finished successfully.
    Completed,
    /// Execution has been created but processing has not begun.
    #[default]
    Starting,
    /// Execution is in progress.
    Started,
    /// A stop has been requested; the execution is winding down.
    Stopping,
    /// Execution stopped before completing, and may be restarted.
    Stopped,
    /// Execution failed.
    Failed,
    /// Execution failed and has been marked as not restartable.
    Abandoned,
    /// The true state of the execution is not known, typically because a
    /// meta-data update failed mid-flight. Not safe to restart automatically.
    Unknown,
}

impl BatchStatus {
    /// Combine two statuses, keeping the more severe outcome.
    ///
    /// The combine is monotonic: a `Failed` or `Unknown` execution is never
    /// downgraded toward success. The one subtlety is that when both sides
    /// are at most `Started`, a `Completed` on either side wins (a finished
    /// execution should not be dragged back to "starting" by a stale
    /// contribution).
    #[must_use]
    pub fn upgrade_to(self, other: BatchStatus) -> BatchStatus {
        if self.is_greater_than(BatchStatus::Started) || other.is_greater_than(BatchStatus::Started)
        {
            self.max(other)
        } else if self == BatchStatus::Completed || other == BatchStatus::Completed {
            BatchStatus::Completed
        } else {
            self.max(other)
        }
    }

    pub fn is_greater_than(self, other: BatchStatus) -> bool {
        self > other
    }

    pub fn is_less_than(self, other: BatchStatus) -> bool {
        self < other
    }

    /// True while the execution is actively processing.
    pub fn is_running(self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }

    pub fn is_unsuccessful(self) -> bool {
        self >= BatchStatus::Failed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown batch status '{0}'")]
pub struct ParseBatchStatusError(String);

impl std::str::FromStr for BatchStatus {
    type Err = ParseBatchStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(BatchStatus::Completed),
            "STARTING" => Ok(BatchStatus::Starting),
            "STARTED" => Ok(BatchStatus::Started),
            "STOPPING" => Ok(BatchStatus::Stopping),
            "STOPPED" => Ok(BatchStatus::Stopped),
            "FAILED" => Ok(BatchStatus::Failed),
            "ABANDONED" => Ok(BatchStatus::Abandoned),
            "UNKNOWN" => Ok(BatchStatus::Unknown),
            other => Err(ParseBatchStatusError(other.to_string())),
        }
    }
}
