//! An in-memory [`JobRepository`], used by the engine's own tests and
//! by the demo binary: a minimal, dependency-free stand-in that
//! exercises the same trait a real (e.g. SQL-backed) repository would
//! implement, which is itself out of this crate's scope (§1).

use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{JobGraph, TaskRecord};

use super::JobRepository;

struct StoredJob {
    root_id: Uuid,
    tasks: HashMap<Uuid, TaskRecord>,
    dependencies: Vec<crate::model::TaskDependency>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, StoredJob>,
    task_to_job: HashMap<Uuid, Uuid>,
}

#[derive(Default)]
pub struct InMemoryRepository {
    inner: Mutex<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryRepository {
    async fn get(&self, job_id: Uuid) -> anyhow::Result<JobGraph> {
        let inner = self.inner.lock().await;
        let stored = inner.jobs.get(&job_id).ok_or_else(|| anyhow!("job {job_id} not found"))?;

        let root = stored
            .tasks
            .get(&stored.root_id)
            .cloned()
            .context("root task missing from stored job")?;
        let mut graph = JobGraph::new(root);

        for task in stored.tasks.values() {
            if *task.id() != stored.root_id {
                graph.add_task(task.clone())?;
            }
        }
        for dep in &stored.dependencies {
            graph.add_dependency(dep.clone())?;
        }
        Ok(graph)
    }

    async fn get_task(&self, task_id: Uuid) -> anyhow::Result<TaskRecord> {
        let inner = self.inner.lock().await;
        let job_id = inner
            .task_to_job
            .get(&task_id)
            .ok_or_else(|| anyhow!("task {task_id} not found"))?;
        inner.jobs[job_id]
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| anyhow!("task {task_id} not found"))
    }

    async fn get_all(&self) -> anyhow::Result<Vec<TaskRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter_map(|j| j.tasks.get(&j.root_id).cloned())
            .collect())
    }

    async fn add(&self, graph: JobGraph) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let root_id = graph.root_id();
        let tasks: HashMap<Uuid, TaskRecord> = graph.tasks().map(|t| (*t.id(), t.clone())).collect();
        let dependencies = graph.dependencies().to_vec();

        for task_id in tasks.keys() {
            inner.task_to_job.insert(*task_id, root_id);
        }
        inner.jobs.insert(root_id, StoredJob { root_id, tasks, dependencies });
        Ok(())
    }

    async fn save_task(&self, task: &TaskRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let job_id = *inner
            .task_to_job
            .get(task.id())
            .ok_or_else(|| anyhow!("task {} not registered with any job", task.id()))?;
        inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("job {job_id} not found"))?
            .tasks
            .insert(*task.id(), task.clone());
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn refresh(&self, _job_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }
}
