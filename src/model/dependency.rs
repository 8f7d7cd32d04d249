//! Dependency edges between tasks within a single enclosing job (§3).

use uuid::Uuid;

use crate::merge::MergeStrategy;

/// A directed edge: `upstream_task_id` must reach `SUCCESS` before
/// `task_id` can run. `job_id` names the enclosing job, used by the
/// graph builder to reject cross-job edges (invariant 1 of §3).
#[derive(Debug, Clone)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub upstream_task_id: Uuid,
    pub job_id: Uuid,
    pub merge_strategy: MergeStrategy,
    /// Name of a registered mapper, used only when `merge_strategy ==
    /// Custom`. The source stores `{module, name}` and resolves it via
    /// `importlib`; here it is a single name resolved against a
    /// `MapperRegistry` the application populates at startup.
    pub mapper_config: Option<String>,
}

impl TaskDependency {
    pub fn new(
        job_id: Uuid,
        task_id: Uuid,
        upstream_task_id: Uuid,
        merge_strategy: MergeStrategy,
        mapper_config: Option<String>,
    ) -> Self {
        TaskDependency {
            task_id,
            upstream_task_id,
            job_id,
            merge_strategy,
            mapper_config,
        }
    }
}
