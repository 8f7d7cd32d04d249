//! The persistent task entity (component C, §3).
//!
//! `TaskRecord` is the flat, single-table-polymorphism shape spec.md
//! describes: the same struct underlies both leaves (`TaskType::Task`)
//! and jobs (`TaskType::Job`), and `kind` is the discriminator used at
//! load time to dispatch to the right [`crate::registry::TaskAction`].

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Task,
    Job,
}

/// A task or job, before it is wired into a [`crate::model::JobGraph`].
///
/// The engine only ever mutates `status`, `error`, `input`, `output`,
/// `started_at` and `finished_at`; everything else is set by
/// application code before the run (invariant 6 of §3).
#[derive(Debug, Clone, Getters, Setters, Serialize, Deserialize)]
pub struct TaskRecord {
    #[getset(get = "pub")]
    id: Uuid,

    #[getset(get = "pub")]
    kind: String,

    #[getset(get = "pub")]
    task_type: TaskType,

    #[getset(get = "pub")]
    name: Option<String>,

    #[getset(get = "pub", set = "pub")]
    status: Status,

    #[getset(get = "pub", set = "pub")]
    error: Option<String>,

    #[getset(get = "pub", set = "pub")]
    input: Option<Value>,

    #[getset(get = "pub", set = "pub")]
    output: Option<Value>,

    #[getset(get = "pub", set = "pub")]
    started_at: Option<DateTime<Utc>>,

    #[getset(get = "pub", set = "pub")]
    finished_at: Option<DateTime<Utc>>,

    #[getset(get = "pub")]
    parent_id: Option<Uuid>,
}

impl TaskRecord {
    pub fn new(kind: impl Into<String>, task_type: TaskType, name: Option<String>, parent_id: Option<Uuid>) -> Self {
        TaskRecord {
            id: Uuid::new_v4(),
            kind: kind.into(),
            task_type,
            name,
            status: Status::Scheduled,
            error: None,
            input: None,
            output: None,
            started_at: None,
            finished_at: None,
            parent_id,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_final()
    }

    /// Marks the task as started "now": sets `status` unchanged but
    /// records `started_at` if not already set.
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(at);
        }
    }

    pub fn mark_finished(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    /// `finished_at - started_at`, when both are set.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some(f - s),
            _ => None,
        }
    }
}
