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

/// Well-known exit codes.
pub mod codes {
    pub const UNKNOWN: &str = "UNKNOWN";
    pub const EXECUTING: &str = "EXECUTING";
    pub const COMPLETED: &str = "COMPLETED";
    pub const NOOP: &str = "NOOP";
    pub const FAILED: &str = "FAILED";
    pub const STOPPED: &str = "STOPPED";
}

/// Fine-grained, combinable outcome of an execution: an exit code plus a
/// free-form description. Richer than [`BatchStatus`](crate::BatchStatus) —
/// transitions in a flow match on the exit code, and custom codes are open
/// ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    exit_code: String,
    exit_description: String,
}

impl ExitStatus {
    pub fn new(exit_code: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: String::new(),
        }
    }

    pub fn with_description(exit_code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: description.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(codes::UNKNOWN)
    }

    pub fn executing() -> Self {
        Self::new(codes::EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(codes::COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(codes::NOOP)
    }

    pub fn failed() -> Self {
        Self::new(codes::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(codes::STOPPED)
    }

    pub fn exit_code(&self) -> &str {
        &self.exit_code
    }

    pub fn exit_description(&self) -> &str {
        &self.exit_description
    }

    /// Severity rank used by [`ExitStatus::and`]. Custom codes sit between
    /// `STOPPED` and `FAILED`, so they override a generic `COMPLETED` but
    /// never mask a failure.
    fn severity(&self) -> u8 {
        match self.exit_code.as_str() {
            codes::EXECUTING => 1,
            codes::COMPLETED => 2,
            codes::NOOP => 3,
            codes::STOPPED => 4,
            codes::FAILED => 6,
            codes::UNKNOWN => 7,
            _ => 5,
        }
    }

    /// Combine with another status, keeping the more severe exit code and
    /// accumulating descriptions.
    ///
    /// The combine is associative, and `EXECUTING` (the lowest severity) is
    /// an identity for the code.
    #[must_use]
    pub fn and(&self, other: &ExitStatus) -> ExitStatus {
        let mut result = self.add_exit_description(&other.exit_description);
        if other.severity() > result.severity() {
            result.exit_code = other.exit_code.clone();
        }
        result
    }

    /// Append to the description, separated by `"; "`. Empty and duplicate
    /// fragments are dropped.
    #[must_use]
    pub fn add_exit_description(&self, description: impl AsRef<str>) -> ExitStatus {
        let fragment = description.as_ref().trim();
        let mut result = self.clone();
        if !fragment.is_empty() && fragment != result.exit_description {
            if !result.exit_description.is_empty() {
                result.exit_description.push_str("; ");
            }
            result.exit_description.push_str(fragment);
        }
        result
    }

    /// Append an error report's message chain to the description.
    #[must_use]
    pub fn add_error_description<C>(&self, report: &error_stack::Report<C>) -> ExitStatus {
        self.add_exit_description(report.to_string())
    }

    /// True while the owning execution is still in progress (or in an
    /// unknowable state).
    pub fn is_running(&self) -> bool {
        self.exit_code == codes::EXECUTING || self.exit_code == codes::UNKNOWN
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.exit_description.is_empty() {
            write!(f, "{}", self.exit_code)
        } else {
            write!(f, "{}: {}", self.exit_code, self.exit_description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_keeps_more_severe_code() {
        assert_eq!(
            ExitStatus::completed().and(&ExitStatus::failed()).exit_code(),
            codes::FAILED
        );
        assert_eq!(
            ExitStatus::failed().and(&ExitStatus::completed()).exit_code(),
            codes::FAILED
        );
    }

    #[test]
    fn test_custom_code_overrides_completed() {
        let custom = ExitStatus::new("COMPLETED_WITH_SKIPS");
        assert_eq!(
            ExitStatus::completed().and(&custom).exit_code(),
            "COMPLETED_WITH_SKIPS"
        );
        // ...but never masks a failure
        assert_eq!(ExitStatus::failed().and(&custom).exit_code(), codes::FAILED);
    }

    #[test]
    fn test_and_is_associative_on_codes() {
        let statuses = [
            ExitStatus::executing(),
            ExitStatus::completed(),
            ExitStatus::noop(),
            ExitStatus::stopped(),
            ExitStatus::new("CUSTOM"),
            ExitStatus::failed(),
            ExitStatus::unknown(),
        ];
        for a in &statuses {
            for b in &statuses {
                for c in &statuses {
                    assert_eq!(
                        a.and(b).and(c).exit_code(),
                        a.and(&b.and(c)).exit_code(),
                        "associativity failed for ({a}, {b}, {c})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_executing_is_identity_for_code() {
        let x = ExitStatus::new("CUSTOM");
        assert_eq!(ExitStatus::executing().and(&x).exit_code(), "CUSTOM");
        assert_eq!(x.and(&ExitStatus::executing()).exit_code(), "CUSTOM");
    }

    #[test]
    fn test_description_accumulates_without_duplicates() {
        let a = ExitStatus::with_description(codes::FAILED, "boom");
        let b = ExitStatus::with_description(codes::FAILED, "boom");
        let c = ExitStatus::with_description(codes::FAILED, "bang");
        assert_eq!(a.and(&b).exit_description(), "boom");
        assert_eq!(a.and(&c).exit_description(), "boom; bang");
    }
}
