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

//! Orchestration for batchflow: steps (tasklet and chunk-oriented, with
//! skip/retry fault tolerance), the flow state machine (states connected by
//! pattern-matched transitions), and the job layer that drives a flow to a
//! terminal status and manages restarts.

pub mod flow;
pub mod job;
pub mod step;
pub mod testing;

pub use flow::{
    DecisionState, EndState, Flow, FlowBuilder, FlowExecution, FlowExecutionStatus, FlowExecutor,
    FlowState, JobExecutionDecider, JobFlowExecutor, SplitState, State, StateTransition, StepState,
};
pub use job::{FlowJob, Job, JobExecutionListener, JobLauncher, StepHandler};
pub use step::{
    ChunkContext, ChunkOrientedTasklet, ItemProcessor, ItemReader, ItemWriter,
    LimitCheckingSkipPolicy, PassThroughItemProcessor, RetryContextCache, SimpleRetryPolicy,
    SkipPolicy, Step, StepBuilder, StepExecutionListener, Tasklet, TaskletStep, VecItemReader,
};
