//! Ergonomic graph-construction helpers, lifted from the source's
//! `Dependency.add_upstream`/`add_downstream` mixin
//! (`task_dependency.py`): build a [`JobGraph`] by adding tasks and
//! wiring dependency edges between them by id, instead of hand-rolling
//! `TaskDependency` structs at every call site.

use uuid::Uuid;

use crate::error::EngineResult;
use crate::merge::MergeStrategy;
use crate::model::dependency::TaskDependency;
use crate::model::graph::JobGraph;
use crate::model::task::TaskRecord;

pub struct GraphBuilder {
    graph: JobGraph,
}

impl GraphBuilder {
    pub fn new(root: TaskRecord) -> Self {
        GraphBuilder { graph: JobGraph::new(root) }
    }

    pub fn root_id(&self) -> Uuid {
        self.graph.root_id()
    }

    pub fn add_task(&mut self, task: TaskRecord) -> EngineResult<&mut Self> {
        self.graph.add_task(task)?;
        Ok(self)
    }

    /// `task_id` depends on each of `upstream_ids`, in the order given
    /// (mirrors `Dependency.add_upstream(*tasks, merge_strategy, mapper)`).
    pub fn add_upstream(
        &mut self,
        job_id: Uuid,
        task_id: Uuid,
        upstream_ids: &[Uuid],
        merge_strategy: MergeStrategy,
        mapper: Option<&str>,
    ) -> EngineResult<&mut Self> {
        for upstream_id in upstream_ids {
            let dep = TaskDependency::new(job_id, task_id, *upstream_id, merge_strategy, mapper.map(String::from));
            self.graph.add_dependency(dep)?;
        }
        Ok(self)
    }

    /// `upstream_id` is upstream of each of `downstream_ids`, all with
    /// the default `REPLACE` strategy (mirrors
    /// `Dependency.add_downstream(*tasks)`, which never takes a merge
    /// strategy — only `add_upstream` does).
    pub fn add_downstream(&mut self, job_id: Uuid, upstream_id: Uuid, downstream_ids: &[Uuid]) -> EngineResult<&mut Self> {
        for task_id in downstream_ids {
            let dep = TaskDependency::new(job_id, *task_id, upstream_id, MergeStrategy::Replace, None);
            self.graph.add_dependency(dep)?;
        }
        Ok(self)
    }

    pub fn build(self) -> JobGraph {
        self.graph
    }
}
