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

//! The step layer: a single [`Step`] contract implemented by
//! [`TaskletStep`], with chunk processing and fault tolerance composed in as
//! strategy objects rather than subclasses.

pub mod chunk;
pub mod fault_tolerant;
pub mod tasklet;

pub use chunk::{
    ChunkOrientedTasklet, ItemProcessor, ItemReader, ItemWriter, PassThroughItemProcessor,
    VecItemReader,
};
pub use fault_tolerant::{
    LimitCheckingSkipPolicy, RetryContextCache, SimpleRetryPolicy, SkipPolicy,
};
pub use tasklet::{ChunkContext, StepBuilder, Tasklet, TaskletStep};

use batchflow_core::{ExitStatus, Result, SharedJobExecution, SharedStepExecution};
use futures::future::BoxFuture;
use futures::FutureExt as _;

/// A phase of a job: processes some unit of work against its step execution
/// and records the outcome there.
///
/// `execute` returns `Ok(())` for any handled terminal outcome — including
/// failure, which is recorded as a `Failed` status for the flow to branch
/// on. An `Err` is reserved for the distinguished signals: cooperative
/// interruption (`StepInterrupted`/`JobInterrupted`) and untrusted
/// meta-data state (`Repository`).
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a completed execution of this step may run again on restart.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Maximum number of executions across all attempts of the instance.
    fn start_limit(&self) -> usize {
        usize::MAX
    }

    fn execute<'a>(
        &'a self,
        job_execution: &'a SharedJobExecution,
        step_execution: &'a SharedStepExecution,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Observer around one step execution. `after_step` may contribute an exit
/// status override, which is `and`-combined into the step's final status;
/// after-listeners run in reverse registration order.
pub trait StepExecutionListener: Send + Sync {
    fn before_step<'a>(&'a self, _step_execution: &'a SharedStepExecution) -> BoxFuture<'a, ()> {
        async {}.boxed()
    }

    fn after_step<'a>(
        &'a self,
        _step_execution: &'a SharedStepExecution,
    ) -> BoxFuture<'a, Option<ExitStatus>> {
        async { None }.boxed()
    }
}
