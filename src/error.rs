//! Error taxonomy (component I, §7 of the design doc).
//!
//! These are the "named" failure modes the engine distinguishes
//! internally (action failure, merge failure, graph/loading failure,
//! repository failure). Call sites that only need to propagate a
//! failure upward use `anyhow::Result`, the way the teacher repo does
//! throughout `orchestrator.rs`; `EngineError` exists for the places
//! that need to pattern-match on *what kind* of failure happened (e.g.
//! distinguishing a load failure, which aborts `run`/`retry` without
//! mutating any task, from an action failure, which transitions the
//! task to `FAILED`).

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("task action for kind '{kind}' failed: {source}")]
    ActionFailed {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to merge inputs for task {task_id}: {reason}")]
    MergeFailed { task_id: Uuid, reason: String },

    #[error("root job {job_id} not found")]
    RootNotFound { job_id: Uuid },

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: Uuid },

    #[error("no action registered for kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("no mapper registered with name '{name}'")]
    UnknownMapper { name: String },

    #[error("edges into task {task_id} disagree on merge strategy")]
    ConflictingMergeStrategy { task_id: Uuid },

    #[error("dependency graph for job {job_id} contains a cycle")]
    CyclicGraph { job_id: Uuid },

    #[error("dependency edge references task {task_id} outside its enclosing job {job_id}")]
    CrossJobEdge { task_id: Uuid, job_id: Uuid },

    #[error("reactive stream for task {task_id} failed: {source}")]
    StreamFailed {
        task_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("repository operation failed: {0}")]
    RepositoryFailed(#[from] anyhow::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
