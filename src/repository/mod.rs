//! The `JobRepository` contract (component H, §6): the only interface
//! the engine uses to reach persistent storage. The engine is written
//! entirely against this trait; schema design and migrations are an
//! external collaborator's concern (§1).

mod memory;

pub use memory::InMemoryRepository;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{JobGraph, TaskRecord};

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Load the root job with its full graph hydrated (children,
    /// upstream/downstream edges). Must return a connected graph.
    async fn get(&self, job_id: Uuid) -> anyhow::Result<JobGraph>;

    /// A single task with no relations loaded, for retry lookup.
    async fn get_task(&self, task_id: Uuid) -> anyhow::Result<TaskRecord>;

    /// All jobs, without their graphs (used by the HTTP surface; not
    /// consumed by the engine itself, kept here because it is part of
    /// the repository contract).
    async fn get_all(&self) -> anyhow::Result<Vec<TaskRecord>>;

    /// Persist a newly constructed graph.
    async fn add(&self, graph: JobGraph) -> anyhow::Result<()>;

    /// Write through a single task's mutable fields (status, error,
    /// input, output, timestamps). Rust has no ORM-style dirty
    /// tracking, so the engine calls this explicitly after every
    /// attribute mutation, then `flush`/`commit`.
    async fn save_task(&self, task: &TaskRecord) -> anyhow::Result<()>;

    async fn flush(&self) -> anyhow::Result<()>;
    async fn commit(&self) -> anyhow::Result<()>;
    async fn refresh(&self, job_id: Uuid) -> anyhow::Result<()>;
}
