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

//! End-to-end scenarios across the job/flow/step/repeat stack.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt as _;

use batchflow_core::{
    BatchError, BatchStatus, JobExecution, JobParameters, JobParametersBuilder, Result,
    SharedJobExecution, SharedStepExecution, StepContribution, StepExecution,
};
use batchflow_execution::testing::{
    failing_step, success_step, CollectingItemWriter, CountingTasklet, FlakyTasklet,
    SelectiveFailingProcessor, StoppingTasklet,
};
use batchflow_execution::{
    ChunkContext, ChunkOrientedTasklet, Flow, FlowExecutionStatus, FlowJob, JobLauncher,
    LimitCheckingSkipPolicy, Step, Tasklet, TaskletStep, VecItemReader,
};
use batchflow_repeat::RepeatStatus;
use batchflow_state::{InMemoryJobRepository, JobRepository};

fn repository() -> Arc<dyn JobRepository> {
    Arc::new(InMemoryJobRepository::new())
}

fn params() -> JobParameters {
    JobParametersBuilder::new().add("input", "fixture.csv").build()
}

async fn step_by_name(
    execution: &SharedJobExecution,
    name: &str,
) -> Option<SharedStepExecution> {
    let execution = execution.read().await;
    for step_execution in execution.step_executions() {
        if step_execution.read().await.step_name == name {
            return Some(step_execution.clone());
        }
    }
    None
}

fn two_step_flow(step1: Arc<dyn Step>, step2: Arc<dyn Step>) -> Arc<Flow> {
    Arc::new(
        Flow::builder("main")
            .step(step1)
            .step(step2)
            .end("done")
            .fail("failed")
            .transition("step1", "COMPLETED", "step2")
            .transition("step1", "*", "failed")
            .transition("step2", "COMPLETED", "done")
            .transition("step2", "*", "failed")
            .build()
            .expect("flow should build"),
    )
}

// Scenario A: step1 succeeds, step2 fails => job FAILED with exactly two
// step executions recorded.
#[tokio::test]
async fn two_step_flow_records_failure_of_second_step() {
    let repository = repository();
    let flow = two_step_flow(
        success_step("step1", repository.clone()),
        failing_step("step2", repository.clone()),
    );
    let job = FlowJob::new("import", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let execution = launcher.run(&job, &params()).await.unwrap();

    let guard = execution.read().await;
    assert_eq!(guard.status, BatchStatus::Failed);
    assert_eq!(guard.exit_status.exit_code(), "FAILED");
    assert_eq!(guard.step_executions().len(), 2);
    drop(guard);

    let step1 = step_by_name(&execution, "step1").await.unwrap();
    assert_eq!(step1.read().await.status, BatchStatus::Completed);
    let step2 = step_by_name(&execution, "step2").await.unwrap();
    let step2 = step2.read().await;
    assert_eq!(step2.status, BatchStatus::Failed);
    assert!(!step2.failure_exceptions().is_empty());
}

// Scenario B: one split branch requests a stop; the other observes it. Both
// branches report STOPPED and so does the job.
#[tokio::test]
async fn split_branch_stop_is_observed_by_the_other_branch() {
    let repository = repository();
    let stopper: Arc<dyn Step> = Arc::new(
        TaskletStep::builder("stopper", Arc::new(StoppingTasklet), repository.clone()).build(),
    );
    let worker: Arc<dyn Step> = Arc::new(
        TaskletStep::builder(
            "worker",
            Arc::new(CountingTasklet::new(10_000)),
            repository.clone(),
        )
        .build(),
    );

    let branch1 = Arc::new(
        Flow::builder("branch1")
            .step(stopper)
            .end("branch1-done")
            .transition("stopper", "*", "branch1-done")
            .build()
            .unwrap(),
    );
    let branch2 = Arc::new(
        Flow::builder("branch2")
            .step(worker)
            .end("branch2-done")
            .transition("worker", "*", "branch2-done")
            .build()
            .unwrap(),
    );
    let flow = Arc::new(
        Flow::builder("main")
            .split("split", vec![branch1, branch2])
            .end("done")
            .transition("split", "*", "done")
            .build()
            .unwrap(),
    );

    let job = FlowJob::new("parallel", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());
    let execution = launcher.run(&job, &params()).await.unwrap();

    assert_eq!(execution.read().await.status, BatchStatus::Stopped);
    for name in ["stopper", "worker"] {
        let step_execution = step_by_name(&execution, name).await.unwrap();
        assert_eq!(
            step_execution.read().await.status,
            BatchStatus::Stopped,
            "step '{name}' should have stopped"
        );
    }
}

// Split aggregation without interruption: FAILED iff any branch failed.
#[tokio::test]
async fn split_aggregates_failed_over_completed() {
    let repository = repository();
    let branch_ok = Arc::new(
        Flow::builder("ok")
            .step(success_step("fine", repository.clone()))
            .end("ok-done")
            .transition("fine", "COMPLETED", "ok-done")
            .transition("fine", "*", "ok-done")
            .build()
            .unwrap(),
    );
    let branch_bad = Arc::new(
        Flow::builder("bad")
            .step(failing_step("broken", repository.clone()))
            .end("bad-done")
            .fail("bad-failed")
            .transition("broken", "COMPLETED", "bad-done")
            .transition("broken", "*", "bad-failed")
            .build()
            .unwrap(),
    );
    let flow = Arc::new(
        Flow::builder("main")
            .split("split", vec![branch_ok, branch_bad])
            .end("done")
            .fail("failed")
            .transition("split", "COMPLETED", "done")
            .transition("split", "*", "failed")
            .build()
            .unwrap(),
    );

    let job = FlowJob::new("fanout", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());
    let execution = launcher.run(&job, &params()).await.unwrap();

    assert_eq!(execution.read().await.status, BatchStatus::Failed);
    assert_eq!(
        step_by_name(&execution, "fine").await.unwrap().read().await.status,
        BatchStatus::Completed
    );
    assert_eq!(
        step_by_name(&execution, "broken").await.unwrap().read().await.status,
        BatchStatus::Failed
    );
}

fn chunk_step(
    repository: Arc<dyn JobRepository>,
    skip_limit: u64,
    writer: Arc<CollectingItemWriter<i32>>,
) -> Arc<dyn Step> {
    let tasklet = ChunkOrientedTasklet::new(
        Arc::new(VecItemReader::new(vec![1, 2, 3, 4, 5, 6])),
        Arc::new(SelectiveFailingProcessor::new(|item: &i32| item % 2 == 0)),
        writer,
        10,
    )
    .with_skip_policy(Arc::new(LimitCheckingSkipPolicy::new(skip_limit, |e| {
        matches!(e, BatchError::Item(_))
    })));
    Arc::new(TaskletStep::builder("chunky", Arc::new(tasklet), repository).build())
}

fn single_step_flow(step: Arc<dyn Step>) -> Arc<Flow> {
    Arc::new(
        Flow::builder("main")
            .step(step)
            .end("done")
            .fail("failed")
            .transition("chunky", "COMPLETED", "done")
            .transition("chunky", "*", "failed")
            .build()
            .unwrap(),
    )
}

// Scenario D: skip limit 2 with three failing items. The first two are
// skipped and counted; the third escalates the step to FAILED.
#[tokio::test]
async fn third_skippable_failure_escalates_past_the_skip_limit() {
    let repository = repository();
    let writer = Arc::new(CollectingItemWriter::new());
    let flow = single_step_flow(chunk_step(repository.clone(), 2, writer.clone()));
    let job = FlowJob::new("chunked", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let execution = launcher.run(&job, &params()).await.unwrap();

    assert_eq!(execution.read().await.status, BatchStatus::Failed);
    let step_execution = step_by_name(&execution, "chunky").await.unwrap();
    let step_execution = step_execution.read().await;
    assert_eq!(step_execution.status, BatchStatus::Failed);
    assert_eq!(step_execution.read_count, 6);
    assert_eq!(step_execution.process_skip_count, 2);
    assert_eq!(step_execution.rollback_count, 1);
}

// With the limit above the failure count, all bad items are skipped and the
// step completes; the writer sees only the good ones.
#[tokio::test]
async fn skippable_failures_within_the_limit_are_absorbed() {
    let repository = repository();
    let writer = Arc::new(CollectingItemWriter::new());
    let flow = single_step_flow(chunk_step(repository.clone(), 3, writer.clone()));
    let job = FlowJob::new("chunked", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let execution = launcher.run(&job, &params()).await.unwrap();

    assert_eq!(execution.read().await.status, BatchStatus::Completed);
    let step_execution = step_by_name(&execution, "chunky").await.unwrap();
    let step_execution = step_execution.read().await;
    assert_eq!(step_execution.status, BatchStatus::Completed);
    assert_eq!(step_execution.process_skip_count, 3);
    assert_eq!(step_execution.write_count, 3);
    assert_eq!(writer.items(), vec![1, 3, 5]);
}

// Scenario E: after Scenario A's failure, a restart re-runs only the failed
// step. The completed step is skipped without a new step execution row.
#[tokio::test]
async fn restart_executes_only_the_failed_step() {
    let repository = repository();
    let step2: Arc<dyn Step> = Arc::new(
        TaskletStep::builder("step2", Arc::new(FlakyTasklet::new(1)), repository.clone()).build(),
    );
    let flow = two_step_flow(success_step("step1", repository.clone()), step2);
    let job = FlowJob::new("import", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let first = launcher.run(&job, &params()).await.unwrap();
    assert_eq!(first.read().await.status, BatchStatus::Failed);
    assert_eq!(first.read().await.step_executions().len(), 2);

    let second = launcher.run(&job, &params()).await.unwrap();
    let guard = second.read().await;
    assert_eq!(guard.status, BatchStatus::Completed);
    assert_eq!(
        guard.step_executions().len(),
        1,
        "only the failed step should run again"
    );
    drop(guard);
    let rerun = step_by_name(&second, "step2").await.unwrap();
    assert_eq!(rerun.read().await.status, BatchStatus::Completed);

    let instance_id = second.read().await.instance.id;
    assert_eq!(
        repository.step_execution_count(instance_id, "step1").await.unwrap(),
        1
    );
    assert_eq!(
        repository.step_execution_count(instance_id, "step2").await.unwrap(),
        2
    );
}

// A stopped end state records where to resume; the restarted execution
// picks up there and skips everything before it.
#[tokio::test]
async fn stop_and_restart_resumes_at_the_recorded_state() {
    let repository = repository();
    let flow = Arc::new(
        Flow::builder("main")
            .step(success_step("step1", repository.clone()))
            .step(success_step("step2", repository.clone()))
            .stop_and_restart("pause", "step2")
            .end("done")
            .transition("step1", "*", "pause")
            .transition("step2", "*", "done")
            .start_state("step1")
            .build()
            .unwrap(),
    );
    let job = FlowJob::new("pausable", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let first = launcher.run(&job, &params()).await.unwrap();
    assert_eq!(first.read().await.status, BatchStatus::Stopped);
    assert_eq!(first.read().await.step_executions().len(), 1);

    let second = launcher.run(&job, &params()).await.unwrap();
    let guard = second.read().await;
    assert_eq!(guard.status, BatchStatus::Completed);
    assert_eq!(guard.step_executions().len(), 1);
    drop(guard);
    assert!(step_by_name(&second, "step2").await.is_some());
    assert!(step_by_name(&second, "step1").await.is_none());
}

// An unresolved transition is a fatal configuration error, not a silent
// default: the job fails and records the cause.
#[tokio::test]
async fn unresolved_transition_fails_the_job() {
    let repository = repository();
    let flow = Arc::new(
        Flow::builder("main")
            .step(success_step("step1", repository.clone()))
            .fail("failed")
            // Only FAILED is routed; a COMPLETED outcome has nowhere to go.
            .transition("step1", "FAILED", "failed")
            .build()
            .unwrap(),
    );
    let job = FlowJob::new("misconfigured", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let execution = launcher.run(&job, &params()).await.unwrap();
    let guard = execution.read().await;
    assert_eq!(guard.status, BatchStatus::Failed);
    assert!(!guard.failure_exceptions().is_empty());
}

// Content-based branching through a decision state.
#[tokio::test]
async fn decision_state_routes_on_job_content() {
    let repository = repository();
    let decider = Arc::new(
        |_job: &JobExecution, step: Option<&StepExecution>| -> Result<FlowExecutionStatus> {
            let processed_anything = step.map(|s| s.read_count > 0).unwrap_or(false);
            Ok(FlowExecutionStatus::new(if processed_anything {
                "FULL"
            } else {
                "EMPTY"
            }))
        },
    );
    let flow = Arc::new(
        Flow::builder("main")
            .step(success_step("step1", repository.clone()))
            .decision("route", decider)
            .end("full-done")
            .fail("empty-done")
            .transition("step1", "*", "route")
            .transition("route", "FULL", "full-done")
            .transition("route", "EMPTY", "empty-done")
            .build()
            .unwrap(),
    );
    let job = FlowJob::new("routed", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let execution = launcher.run(&job, &params()).await.unwrap();
    assert_eq!(execution.read().await.status, BatchStatus::Completed);
}

// A step left in UNKNOWN status halts the flow before the next state: the
// stored state is untrusted, so no further steps run.
#[tokio::test]
async fn unknown_step_status_stops_the_flow() {
    struct UnknownTasklet;
    impl Tasklet for UnknownTasklet {
        fn execute<'a>(
            &'a self,
            _contribution: &'a mut StepContribution,
            context: &'a ChunkContext,
        ) -> BoxFuture<'a, Result<RepeatStatus>> {
            async move {
                context.step_execution.write().await.status = BatchStatus::Unknown;
                Ok(RepeatStatus::Finished)
            }
            .boxed()
        }
    }

    let repository = repository();
    let step1: Arc<dyn Step> = Arc::new(
        TaskletStep::builder("step1", Arc::new(UnknownTasklet), repository.clone()).build(),
    );
    let flow = two_step_flow(step1, success_step("step2", repository.clone()));
    let job = FlowJob::new("untrusted", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let execution = launcher.run(&job, &params()).await.unwrap();
    let guard = execution.read().await;
    assert_eq!(guard.step_executions().len(), 1, "step2 must not run");
    assert_eq!(guard.status, BatchStatus::Stopped);
}

// Concurrent chunk processing drives the same tasklet from the pool and
// still aggregates every contribution.
#[tokio::test]
async fn pooled_step_collects_all_chunk_contributions() {
    let repository = repository();
    let tasklet = Arc::new(CountingTasklet::new(25));
    let step: Arc<dyn Step> = Arc::new(
        TaskletStep::builder("pooled", tasklet.clone(), repository.clone())
            .throttle_limit(4)
            .build(),
    );
    let flow = Arc::new(
        Flow::builder("main")
            .state(Arc::new(batchflow_execution::StepState::new(step)))
            .end("done")
            .fail("failed")
            .transition("pooled", "COMPLETED", "done")
            .transition("pooled", "*", "failed")
            .build()
            .unwrap(),
    );
    let job = FlowJob::new("concurrent", flow, repository.clone());
    let launcher = JobLauncher::new(repository.clone());

    let execution = launcher.run(&job, &params()).await.unwrap();
    assert_eq!(execution.read().await.status, BatchStatus::Completed);
    let step_execution = step_by_name(&execution, "pooled").await.unwrap();
    let step_execution = step_execution.read().await;
    assert_eq!(step_execution.status, BatchStatus::Completed);
    // Every chunk's contribution was applied: at least the 25 planned reads,
    // plus any chunks submitted while the finishing result was in flight.
    assert!(step_execution.read_count >= 25);
    assert_eq!(step_execution.read_count, step_execution.commit_count);
}
