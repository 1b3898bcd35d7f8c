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

//! Core value types for the batchflow execution engine: batch and exit
//! statuses, job/step execution metadata, job parameters, and the
//! checkpointable execution context.

pub mod context;
pub mod error;
pub mod execution;
pub mod exit_status;
pub mod parameters;
pub mod status;

// Re-export commonly used types
pub use context::ExecutionContext;
pub use error::{BatchError, Result};
pub use execution::{
    JobExecution, JobInstance, SharedJobExecution, SharedStepExecution, StepContribution,
    StepExecution,
};
pub use exit_status::ExitStatus;
pub use parameters::{JobParameter, JobParameters, JobParametersBuilder};
pub use status::BatchStatus;
