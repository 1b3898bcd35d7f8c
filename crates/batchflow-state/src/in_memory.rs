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

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use error_stack::report;
use futures::future::{BoxFuture, FutureExt as _};
use tokio::sync::RwLock;
use uuid::Uuid;

use batchflow_core::{
    BatchStatus, JobExecution, JobInstance, JobParameters, SharedJobExecution,
    SharedStepExecution, StepExecution,
};

use crate::error::{RepositoryError, Result};
use crate::keyed_lock::KeyedLock;
use crate::repository::JobRepository;

#[derive(Debug)]
struct InstanceRecord {
    instance: JobInstance,
    /// Executions in creation order; the last entry is the most recent.
    executions: Vec<SharedJobExecution>,
}

/// In-memory implementation of [`JobRepository`].
///
/// An explicit store owned by whoever composes the engine — there is no
/// package-level singleton. Version counters are kept separately from the
/// shared execution handles, so a stale in-flight handle fails the version
/// check the same way it would against a durable store.
pub struct InMemoryJobRepository {
    instances: RwLock<HashMap<(String, String), InstanceRecord>>,
    job_versions: RwLock<HashMap<Uuid, u64>>,
    step_versions: RwLock<HashMap<Uuid, u64>>,
    lock: KeyedLock,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            job_versions: RwLock::new(HashMap::new()),
            step_versions: RwLock::new(HashMap::new()),
            lock: KeyedLock::new(),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn find_record_by_instance(
        instances: &HashMap<(String, String), InstanceRecord>,
        job_instance_id: Uuid,
    ) -> Option<&InstanceRecord> {
        instances
            .values()
            .find(|record| record.instance.id == job_instance_id)
    }

    async fn checked_job_update(&self, execution: &SharedJobExecution) -> Result<()> {
        let mut execution = execution.write().await;
        let mut versions = self.job_versions.write().await;
        let stored = versions
            .get_mut(&execution.id)
            .ok_or_else(|| report!(RepositoryError::ExecutionNotFound(execution.id)))?;
        if *stored != execution.version {
            return Err(report!(RepositoryError::OptimisticLock {
                entity: format!("job execution {}", execution.id),
                expected: execution.version,
                actual: *stored,
            }));
        }
        *stored += 1;
        execution.version += 1;
        execution.last_updated = Some(Utc::now());
        Ok(())
    }

    async fn checked_step_update(&self, execution: &SharedStepExecution) -> Result<()> {
        let mut execution = execution.write().await;
        let mut versions = self.step_versions.write().await;
        let stored = versions
            .get_mut(&execution.id)
            .ok_or_else(|| report!(RepositoryError::ExecutionNotFound(execution.id)))?;
        if *stored != execution.version {
            return Err(report!(RepositoryError::OptimisticLock {
                entity: format!("step execution {}", execution.id),
                expected: execution.version,
                actual: *stored,
            }));
        }
        *stored += 1;
        execution.version += 1;
        execution.last_updated = Some(Utc::now());
        Ok(())
    }
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution<'a>(
        &'a self,
        job_name: &'a str,
        parameters: &'a JobParameters,
        restartable: bool,
    ) -> BoxFuture<'a, Result<SharedJobExecution>> {
        async move {
            let key = (job_name.to_string(), parameters.identity_key());
            let mut instances = self.instances.write().await;
            let record = instances.entry(key).or_insert_with(|| InstanceRecord {
                instance: JobInstance::new(job_name, parameters.clone()),
                executions: Vec::new(),
            });

            let mut carried_context = None;
            if let Some(last) = record.executions.last() {
                let last = last.read().await;
                if last.end_time.is_none() {
                    return Err(report!(RepositoryError::JobExecutionAlreadyRunning {
                        job_name: job_name.to_string(),
                    }));
                }
                if last.status == BatchStatus::Completed {
                    return Err(report!(RepositoryError::JobInstanceAlreadyComplete {
                        job_name: job_name.to_string(),
                    }));
                }
                if !restartable {
                    return Err(report!(RepositoryError::JobRestartNotAllowed {
                        job_name: job_name.to_string(),
                    }));
                }
                carried_context = Some(last.execution_context.clone());
            }

            record.instance.version += 1;
            let mut execution = JobExecution::new(record.instance.clone());
            if let Some(context) = carried_context {
                execution.execution_context.merge(&context);
                execution.execution_context.clear_dirty();
            }
            log::debug!(
                "created job execution {} for instance {} of job '{job_name}'",
                execution.id,
                record.instance.id
            );
            let id = execution.id;
            let execution = Arc::new(RwLock::new(execution));
            record.executions.push(execution.clone());
            self.job_versions.write().await.insert(id, 0);
            Ok(execution)
        }
        .boxed()
    }

    fn update_job_execution<'a>(
        &'a self,
        execution: &'a SharedJobExecution,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let key = format!("job-{}", execution.read().await.id);
            self.lock.lock(&key).await?;
            let result = self.checked_job_update(execution).await;
            self.lock.unlock(&key)?;
            result
        }
        .boxed()
    }

    fn add_step_execution<'a>(
        &'a self,
        job_execution: &'a SharedJobExecution,
        step_execution: StepExecution,
    ) -> BoxFuture<'a, Result<SharedStepExecution>> {
        async move {
            let handle = job_execution.write().await.add_step_execution(step_execution);
            let id = {
                let mut step_execution = handle.write().await;
                step_execution.last_updated = Some(Utc::now());
                step_execution.id
            };
            self.step_versions.write().await.insert(id, 0);
            Ok(handle)
        }
        .boxed()
    }

    fn update_step_execution<'a>(
        &'a self,
        execution: &'a SharedStepExecution,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let key = format!("step-{}", execution.read().await.id);
            self.lock.lock(&key).await?;
            let result = self.checked_step_update(execution).await;
            self.lock.unlock(&key)?;
            result
        }
        .boxed()
    }

    fn update_execution_context<'a>(
        &'a self,
        execution: &'a SharedStepExecution,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let key = format!("step-{}", execution.read().await.id);
            self.lock.lock(&key).await?;
            execution.write().await.execution_context.clear_dirty();
            self.lock.unlock(&key)?;
            Ok(())
        }
        .boxed()
    }

    fn last_job_execution<'a>(
        &'a self,
        job_name: &'a str,
        parameters: &'a JobParameters,
    ) -> BoxFuture<'a, Result<Option<SharedJobExecution>>> {
        async move {
            let key = (job_name.to_string(), parameters.identity_key());
            let instances = self.instances.read().await;
            Ok(instances
                .get(&key)
                .and_then(|record| record.executions.last().cloned()))
        }
        .boxed()
    }

    fn last_step_execution<'a>(
        &'a self,
        job_instance_id: Uuid,
        step_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<SharedStepExecution>>> {
        async move {
            let instances = self.instances.read().await;
            let Some(record) = Self::find_record_by_instance(&instances, job_instance_id) else {
                return Ok(None);
            };
            for execution in record.executions.iter().rev() {
                let execution = execution.read().await;
                for step_execution in execution.step_executions().iter().rev() {
                    if step_execution.read().await.step_name == step_name {
                        return Ok(Some(step_execution.clone()));
                    }
                }
            }
            Ok(None)
        }
        .boxed()
    }

    fn step_execution_count<'a>(
        &'a self,
        job_instance_id: Uuid,
        step_name: &'a str,
    ) -> BoxFuture<'a, Result<usize>> {
        async move {
            let instances = self.instances.read().await;
            let Some(record) = Self::find_record_by_instance(&instances, job_instance_id) else {
                return Ok(0);
            };
            let mut count = 0;
            for execution in &record.executions {
                let execution = execution.read().await;
                for step_execution in execution.step_executions() {
                    if step_execution.read().await.step_name == step_name {
                        count += 1;
                    }
                }
            }
            Ok(count)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchflow_core::JobParametersBuilder;

    fn params() -> JobParameters {
        JobParametersBuilder::new().add("input", "a.csv").build()
    }

    async fn finish(execution: &SharedJobExecution, status: BatchStatus) {
        let mut execution = execution.write().await;
        execution.start_time = Some(Utc::now());
        execution.end_time = Some(Utc::now());
        execution.status = status;
    }

    #[tokio::test]
    async fn test_completed_instance_cannot_be_restarted() {
        let repo = InMemoryJobRepository::new();
        let execution = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap();
        finish(&execution, BatchStatus::Completed).await;
        let err = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RepositoryError::JobInstanceAlreadyComplete { .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_instance_restarts_with_carried_context() {
        let repo = InMemoryJobRepository::new();
        let first = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap();
        first
            .write()
            .await
            .execution_context
            .put("checkpoint", 42);
        finish(&first, BatchStatus::Failed).await;

        let second = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap();
        let second = second.read().await;
        assert_eq!(second.execution_context.get_i64("checkpoint"), Some(42));
        assert_eq!(second.instance.id, first.read().await.instance.id);
    }

    #[tokio::test]
    async fn test_non_restartable_job_rejects_second_execution() {
        let repo = InMemoryJobRepository::new();
        let first = repo
            .create_job_execution("once", &params(), false)
            .await
            .unwrap();
        finish(&first, BatchStatus::Failed).await;
        let err = repo
            .create_job_execution("once", &params(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RepositoryError::JobRestartNotAllowed { .. }
        ));
    }

    #[tokio::test]
    async fn test_running_execution_blocks_a_new_one() {
        let repo = InMemoryJobRepository::new();
        let _running = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap();
        let err = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            RepositoryError::JobExecutionAlreadyRunning { .. }
        ));
    }

    #[tokio::test]
    async fn test_different_identifying_parameters_are_different_instances() {
        let repo = InMemoryJobRepository::new();
        let a = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap();
        let other = JobParametersBuilder::new().add("input", "b.csv").build();
        let b = repo
            .create_job_execution("import", &other, true)
            .await
            .unwrap();
        assert_ne!(
            a.read().await.instance.id,
            b.read().await.instance.id
        );
    }

    #[tokio::test]
    async fn test_stale_version_fails_optimistic_check() {
        let repo = InMemoryJobRepository::new();
        let execution = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap();
        repo.update_job_execution(&execution).await.unwrap();
        assert_eq!(execution.read().await.version, 1);

        // Simulate a stale handle: roll the in-memory copy's version back.
        execution.write().await.version = 0;
        let err = repo.update_job_execution(&execution).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            RepositoryError::OptimisticLock { .. }
        ));
    }

    #[tokio::test]
    async fn test_last_step_execution_returns_most_recent() {
        let repo = InMemoryJobRepository::new();
        let execution = repo
            .create_job_execution("import", &params(), true)
            .await
            .unwrap();
        let first = {
            let guard = execution.read().await;
            StepExecution::new("load", &guard)
        };
        let second = {
            let guard = execution.read().await;
            StepExecution::new("load", &guard)
        };
        let _first = repo.add_step_execution(&execution, first).await.unwrap();
        let second = repo.add_step_execution(&execution, second).await.unwrap();

        let instance_id = execution.read().await.instance.id;
        let found = repo
            .last_step_execution(instance_id, "load")
            .await
            .unwrap()
            .expect("step execution should exist");
        assert_eq!(found.read().await.id, second.read().await.id);
        assert_eq!(repo.step_execution_count(instance_id, "load").await.unwrap(), 2);
    }
}
