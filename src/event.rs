//! Events propagated through each reactive node's subject.

use uuid::Uuid;

use crate::status::Status;

/// What kind of thing happened to a node.
///
/// `SETUP` is a quiescent "nothing to do yet" signal emitted before the
/// root fires; it never triggers execution. `RUN` is the real execution
/// trigger. `RETRY` reopens a finished task and, by propagating through
/// the subject chain, its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    None,
    Setup,
    Run,
    Retry,
    Failed,
    Finished,
}

impl EventType {
    pub fn skip_execution(self) -> bool {
        matches!(self, EventType::Setup)
    }
}

/// `{task, type}` as described in the glossary: the unit of information
/// that flows through a node's `watch` subject.
///
/// Carries a snapshot of the task's status (rather than the whole
/// record) because it is cloned on every combine-latest wakeup; the
/// full record stays behind the node's `Arc<RwLock<TaskRecord>>` and is
/// read by the handler when it actually needs more than status.
#[derive(Debug, Clone)]
pub struct Event {
    pub task_id: Uuid,
    pub status: Status,
    pub event_type: EventType,
}

impl Event {
    pub fn new(task_id: Uuid, status: Status, event_type: EventType) -> Self {
        Event { task_id, status, event_type }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_final()
    }
}

/// `all(e.type in {SETUP, NONE} for e in events)`
pub fn is_setup<'a, I: IntoIterator<Item = &'a Event>>(events: I) -> bool {
    events
        .into_iter()
        .all(|e| matches!(e.event_type, EventType::Setup | EventType::None))
}

/// `any(e.type == RETRY for e in events)`
pub fn is_retry<'a, I: IntoIterator<Item = &'a Event>>(events: I) -> bool {
    events.into_iter().any(|e| e.event_type == EventType::Retry)
}
