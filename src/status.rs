//! The status algebra (component A): an ordering over task lifecycle
//! states and the fold that derives a job's status from its children.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`crate::model::TaskRecord`].
///
/// `SCHEDULED` is the initial state. `SUCCESS`, `FAILED` and `SKIPPED`
/// are final (see [`Status::is_final`]); a task only leaves a final
/// state via an explicit retry, which moves it to `READY_TO_RETRY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Scheduled,
    Running,
    Success,
    Failed,
    Skipped,
    ReadyToRetry,
}

impl Status {
    /// `SUCCESS`, `FAILED` and `SKIPPED` are final; everything else
    /// can still transition.
    pub fn is_final(self) -> bool {
        matches!(self, Status::Success | Status::Failed | Status::Skipped)
    }

    /// Fold a job's children statuses into the job's own status.
    ///
    /// Precedence, checked in order: empty -> `SCHEDULED`; any
    /// `READY_TO_RETRY` wins over everything (reopening one descendant
    /// pulls the whole ancestor chain out of its final state); then any
    /// `FAILED` wins over `RUNNING` (a job is failed the moment one
    /// child fails, even while siblings keep running); then any
    /// `RUNNING`; then all `SKIPPED`; then all `SUCCESS`; otherwise
    /// `SCHEDULED`.
    pub fn compute<I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        let statuses: Vec<Status> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return Status::Scheduled;
        }
        if statuses.iter().any(|s| *s == Status::ReadyToRetry) {
            return Status::ReadyToRetry;
        }
        if statuses.iter().any(|s| *s == Status::Failed) {
            return Status::Failed;
        }
        if statuses.iter().any(|s| *s == Status::Running) {
            return Status::Running;
        }
        if statuses.iter().all(|s| *s == Status::Skipped) {
            return Status::Skipped;
        }
        if statuses.iter().all(|s| *s == Status::Success) {
            return Status::Success;
        }
        Status::Scheduled
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Scheduled => "SCHEDULED",
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
            Status::Skipped => "SKIPPED",
            Status::ReadyToRetry => "READY_TO_RETRY",
        };
        write!(f, "{s}")
    }
}
