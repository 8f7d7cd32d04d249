//! The engine itself (components E/F/G): load a job, wire it into a
//! reactive node graph, kick off the root, and wait for it to reach a
//! final status. Mirrors the shape of the teacher's own orchestrator
//! loop in `orchestrator/orchestrator.rs` — spawn one task per unit of
//! work, fan results back through channels, `tokio::spawn` instead of
//! blocking — generalized from "one job queue, N package builds" to
//! "one job graph, N reactive nodes".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::FuturesUnordered;
use tokio::sync::Mutex;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::event::{Event, EventType};
use crate::merge::MapperRegistry;
use crate::registry::ActionRegistry;
use crate::repository::JobRepository;
use crate::status::Status;

use super::graph_builder::{self, BuiltGraph};
use super::node::{EngineContext, NodeHandles};

struct EngineState {
    handles: HashMap<Uuid, NodeHandles>,
    background: Vec<tokio::task::JoinHandle<()>>,
}

/// Runs exactly one job to completion (and, afterward, services
/// retries against the graph it built). One `Engine` per job id; see
/// [`EngineRegistry`] for the guard that keeps it that way.
pub struct Engine {
    job_id: Uuid,
    repository: Arc<dyn JobRepository>,
    actions: Arc<ActionRegistry>,
    mappers: Arc<MapperRegistry>,
    config: EngineConfig,
    state: Mutex<Option<EngineState>>,
}

impl Engine {
    pub fn new(
        job_id: Uuid,
        repository: Arc<dyn JobRepository>,
        actions: Arc<ActionRegistry>,
        mappers: Arc<MapperRegistry>,
        config: EngineConfig,
    ) -> Self {
        Engine { job_id, repository, actions, mappers, config, state: Mutex::new(None) }
    }

    /// Loads the job, builds its node graph, starts the root, and
    /// blocks until the root reaches a final [`Status`]. The node
    /// graph keeps running afterward so [`Engine::retry`] can still
    /// reopen finished tasks.
    pub async fn run(&self) -> EngineResult<Status> {
        tracing::info!(job_id = %self.job_id, "loading job graph");
        let graph = self.repository.get(self.job_id).await.map_err(EngineError::RepositoryFailed)?;

        let ctx = Arc::new(EngineContext {
            job_lock: Arc::new(Mutex::new(())),
            repository: self.repository.clone(),
            actions: self.actions.clone(),
            mappers: self.mappers.clone(),
            config: self.config.clone(),
        });

        let BuiltGraph { root_id, handles, runnables } = graph_builder::build(&graph, ctx.clone())?;
        tracing::debug!(job_id = %self.job_id, node_count = handles.len(), "graph built, spawning nodes");

        let mut root_output = handles[&root_id].output_rx.clone();

        let mut background = Vec::with_capacity(runnables.len());
        for node in runnables {
            background.push(tokio::spawn(node.run()));
        }

        {
            let root_handle = &handles[&root_id];
            let _guard = ctx.job_lock.lock().await;
            let snapshot = {
                let mut rec = root_handle.record.write().await;
                rec.mark_started(Utc::now());
                rec.clone()
            };
            self.repository.save_task(&snapshot).await.map_err(EngineError::RepositoryFailed)?;
            self.repository.flush().await.map_err(EngineError::RepositoryFailed)?;
            self.repository.commit().await.map_err(EngineError::RepositoryFailed)?;
            let _ = root_handle.cmd_tx.send(Event::new(root_id, *snapshot.status(), EventType::Run));
        }

        let final_status = loop {
            let event = root_output.borrow_and_update().clone();
            if event.is_finished() {
                break event.status;
            }
            if root_output.changed().await.is_err() {
                return Err(EngineError::StreamFailed {
                    task_id: root_id,
                    source: anyhow::anyhow!("root output channel closed before reaching a final status"),
                });
            }
        };

        tracing::info!(job_id = %self.job_id, status = %final_status, "job run settled");

        let mut state = self.state.lock().await;
        *state = Some(EngineState { handles, background });

        Ok(final_status)
    }

    /// Reopens an already-finished leaf task. Requires [`Engine::run`]
    /// to have been called first (the node graph must exist).
    pub async fn retry(&self, task_id: Uuid) -> EngineResult<()> {
        tracing::info!(%task_id, "retry requested");
        let state = self.state.lock().await;
        let state = state.as_ref().ok_or(EngineError::TaskNotFound { task_id })?;
        let handle = state.handles.get(&task_id).ok_or(EngineError::TaskNotFound { task_id })?;
        handle.retry().await
    }

    /// The live status of any task in this job's graph, read straight
    /// from the in-memory record (§5's "cheap outside-the-lock read").
    pub async fn status_of(&self, task_id: Uuid) -> EngineResult<Status> {
        let state = self.state.lock().await;
        let state = state.as_ref().ok_or(EngineError::TaskNotFound { task_id })?;
        let handle = state.handles.get(&task_id).ok_or(EngineError::TaskNotFound { task_id })?;
        let status = *handle.record.read().await.status();
        Ok(status)
    }

    /// Aborts every background node task. Tolerates the cancellation
    /// errors that abort itself produces; surfaces anything else.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(EngineState { background, .. }) = state.take() {
            for handle in &background {
                handle.abort();
            }
            let mut tasks: FuturesUnordered<_> = background.into_iter().collect();
            while let Some(result) = tasks.next().await {
                if let Err(join_err) = result {
                    if !join_err.is_cancelled() {
                        return Err(join_err.into());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Ensures at most one [`Engine`] exists per job id, the way the
/// source's `active_engines` (a `ConcurrentAsyncMap`) guards
/// `run`/`retry` against two concurrent callers building two separate
/// node graphs for the same job.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Mutex<HashMap<Uuid, Arc<Engine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, job_id: Uuid, make: impl FnOnce() -> Engine) -> Arc<Engine> {
        let mut engines = self.engines.lock().await;
        engines.entry(job_id).or_insert_with(|| Arc::new(make())).clone()
    }

    pub async fn get(&self, job_id: Uuid) -> Option<Arc<Engine>> {
        self.engines.lock().await.get(&job_id).cloned()
    }
}
