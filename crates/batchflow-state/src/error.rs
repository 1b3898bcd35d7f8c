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
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RepositoryError {
    /// The stored version no longer matches the caller's copy. The on-disk
    /// state is not trusted; the core maps this to `BatchStatus::Unknown`
    /// and refuses automatic restart.
    #[error("version mismatch for {entity}: expected {expected}, found {actual}")]
    OptimisticLock {
        entity: String,
        expected: u64,
        actual: u64,
    },
    #[error("a job execution for job '{job_name}' is already running")]
    JobExecutionAlreadyRunning { job_name: String },
    #[error("job instance for job '{job_name}' is already complete")]
    JobInstanceAlreadyComplete { job_name: String },
    #[error("job '{job_name}' has existing executions and is not restartable")]
    JobRestartNotAllowed { job_name: String },
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),
    /// Unlock of a key that was never locked: a programming error in the
    /// caller, never a silent no-op.
    #[error("unlock of key '{key}' that is not locked")]
    LockNotHeld { key: String },
    #[error("internal repository error")]
    Internal,
}

pub type Result<T, E = error_stack::Report<RepositoryError>> = std::result::Result<T, E>;
