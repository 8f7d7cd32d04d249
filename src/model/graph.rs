//! `JobGraph`: the persistent shape a [`crate::repository::JobRepository`]
//! hands the engine — one root job with all descendant tasks and
//! intra-job dependency edges hydrated (§6, "must return a connected
//! graph").

use std::collections::HashMap;

use daggy::Dag;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::merge::MergeStrategy;
use crate::model::dependency::TaskDependency;
use crate::model::task::TaskRecord;

/// A loaded job: every task reachable from the root (by `parent_id`),
/// and every dependency edge between them.
///
/// Cycles are rejected as soon as the offending edge is added
/// (invariant 2 of §3), using a `daggy::Dag` purely as the cycle-check
/// oracle; `tasks`/`dependencies`/`children_of` remain the engine's
/// actual view of the graph.
pub struct JobGraph {
    root_id: Uuid,
    tasks: HashMap<Uuid, TaskRecord>,
    dependencies: Vec<TaskDependency>,
    children_of: HashMap<Uuid, Vec<Uuid>>,
    dag: Dag<Uuid, ()>,
    node_index: HashMap<Uuid, daggy::NodeIndex>,
}

impl JobGraph {
    pub fn new(root: TaskRecord) -> Self {
        let root_id = *root.id();
        let mut dag = Dag::new();
        let idx = dag.add_node(root_id);
        let mut node_index = HashMap::new();
        node_index.insert(root_id, idx);
        let mut tasks = HashMap::new();
        tasks.insert(root_id, root);
        JobGraph {
            root_id,
            tasks,
            dependencies: Vec::new(),
            children_of: HashMap::new(),
            dag,
            node_index,
        }
    }

    pub fn root_id(&self) -> Uuid {
        self.root_id
    }

    pub fn root(&self) -> &TaskRecord {
        self.tasks.get(&self.root_id).expect("root always present")
    }

    pub fn add_task(&mut self, task: TaskRecord) -> EngineResult<()> {
        let id = *task.id();
        let idx = self.dag.add_node(id);
        self.node_index.insert(id, idx);
        if let Some(parent_id) = task.parent_id() {
            self.children_of.entry(*parent_id).or_default().push(id);
        }
        self.tasks.insert(id, task);
        Ok(())
    }

    pub fn add_dependency(&mut self, dep: TaskDependency) -> EngineResult<()> {
        if !self.tasks.contains_key(&dep.task_id) {
            return Err(EngineError::TaskNotFound { task_id: dep.task_id });
        }
        if !self.tasks.contains_key(&dep.upstream_task_id) {
            return Err(EngineError::TaskNotFound { task_id: dep.upstream_task_id });
        }
        if dep.job_id != self.root_id && !self.tasks.contains_key(&dep.job_id) {
            return Err(EngineError::CrossJobEdge { task_id: dep.task_id, job_id: dep.job_id });
        }

        let task_idx = self.node_index[&dep.task_id];
        let upstream_idx = self.node_index[&dep.upstream_task_id];
        self.dag
            .add_edge(upstream_idx, task_idx, ())
            .map_err(|_| EngineError::CyclicGraph { job_id: self.root_id })?;

        self.dependencies.push(dep);
        self.validate_merge_strategy_agreement()?;
        Ok(())
    }

    fn validate_merge_strategy_agreement(&self) -> EngineResult<()> {
        let mut seen: HashMap<Uuid, (MergeStrategy, Option<&str>)> = HashMap::new();
        for dep in &self.dependencies {
            let entry = (dep.merge_strategy, dep.mapper_config.as_deref());
            match seen.get(&dep.task_id) {
                None => {
                    seen.insert(dep.task_id, entry);
                }
                Some(existing) if *existing != entry => {
                    return Err(EngineError::ConflictingMergeStrategy { task_id: dep.task_id });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn task(&self, id: Uuid) -> Option<&TaskRecord> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values()
    }

    pub fn dependencies(&self) -> &[TaskDependency] {
        &self.dependencies
    }

    pub fn children_of(&self, parent_id: Uuid) -> &[Uuid] {
        self.children_of.get(&parent_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Upstream task ids for `task_id`, in edge-declaration order.
    pub fn upstream_of(&self, task_id: Uuid) -> Vec<Uuid> {
        self.dependencies
            .iter()
            .filter(|d| d.task_id == task_id)
            .map(|d| d.upstream_task_id)
            .collect()
    }

    /// The single merge strategy governing edges into `task_id` (the
    /// first edge's strategy, since agreement is enforced at
    /// construction), along with its mapper name if any.
    pub fn merge_strategy_for(&self, task_id: Uuid) -> Option<(MergeStrategy, Option<String>)> {
        self.dependencies
            .iter()
            .find(|d| d.task_id == task_id)
            .map(|d| (d.merge_strategy, d.mapper_config.clone()))
    }
}
