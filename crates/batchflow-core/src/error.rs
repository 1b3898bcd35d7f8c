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

use thiserror::Error;

/// Engine-wide error taxonomy.
///
/// Every failure the engine can surface is one of these variants, so callers
/// (skip policies, exception handlers, status mapping) classify errors with a
/// closed `match` instead of runtime type inspection. Repository failures are
/// owned by `batchflow-state` and converted to [`BatchError::Repository`] at
/// the boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Cooperative interruption observed at the job level.
    #[error("job interrupted")]
    JobInterrupted,
    /// Cooperative interruption observed between chunk iterations.
    #[error("step '{0}' interrupted")]
    StepInterrupted(String),
    /// Unresolvable or malformed flow graph. Always fatal, never defaulted.
    #[error("invalid flow configuration: {0}")]
    FlowConfiguration(String),
    /// A decision callback failed. Fatal to the flow, not a branch outcome.
    #[error("decider failed in state '{0}'")]
    Decider(String),
    #[error("start limit {limit} exceeded for step '{step}'")]
    StartLimitExceeded { step: String, limit: usize },
    #[error("job restart not possible: {0}")]
    JobRestart(String),
    #[error("no such job '{0}'")]
    NoSuchJob(String),
    /// Persistence/meta-data update failure, including optimistic-version
    /// conflicts. The stored state is no longer trusted; the execution ends
    /// `Unknown` and must not be restarted automatically.
    #[error("error accessing job repository")]
    Repository,
    #[error("skip limit {limit} exceeded")]
    SkipLimitExceeded { limit: usize },
    #[error("retry exhausted after {attempts} attempts")]
    RetryExhausted { attempts: usize },
    #[error("retry context cache capacity {capacity} exceeded")]
    RetryCacheOverflow { capacity: usize },
    /// Business/item failure raised while reading, processing or writing a
    /// chunk item. Subject to skip/retry classification.
    #[error("item processing failed: {0}")]
    Item(String),
    /// Uncategorized business failure inside a chunk callback.
    #[error("tasklet failed: {0}")]
    Tasklet(String),
    /// Violation of the result queue's expect/put/take protocol. This is a
    /// programming error in the driver, not a runtime condition.
    #[error("result queue protocol violation: {0}")]
    ResultQueueProtocol(&'static str),
}

pub type Result<T, E = error_stack::Report<BatchError>> = std::result::Result<T, E>;
