//! Turns a loaded [`JobGraph`] into a tree of reactive nodes (§4.5):
//! one [`TaskNode`] per leaf, one [`JobNode`] per job, wired together
//! exactly along the graph's `parent_id`/dependency edges.
//!
//! Channel creation and node assembly are deliberately split into two
//! passes. A job's children need to observe the job's own command
//! channel (when they have no upstream of their own) and the job
//! itself needs to observe every child's output channel — each side
//! needs the other to already exist. Pre-allocating every node's
//! channels up front (pass 1) before assembling any node (pass 2)
//! sidesteps the ordering problem entirely.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::model::{JobGraph, TaskRecord, TaskType};

use super::node::{new_channels, AnyNode, EngineContext, JobNode, NodeChannels, NodeHandles, TaskNode, Trigger};

/// The fully wired graph, ready for the engine to spawn and observe.
pub struct BuiltGraph {
    pub root_id: Uuid,
    pub handles: HashMap<Uuid, NodeHandles>,
    pub runnables: Vec<AnyNode>,
}

pub fn build(graph: &JobGraph, ctx: Arc<EngineContext>) -> EngineResult<BuiltGraph> {
    let records: HashMap<Uuid, Arc<RwLock<TaskRecord>>> =
        graph.tasks().map(|t| (*t.id(), Arc::new(RwLock::new(t.clone())))).collect();

    let channels: HashMap<Uuid, NodeChannels> = records
        .iter()
        .map(|(id, record)| {
            let status = *record.try_read().expect("freshly created, uncontended").status();
            (*id, new_channels(*id, status))
        })
        .collect();

    let mut handles = HashMap::with_capacity(records.len());
    let mut runnables = Vec::with_capacity(records.len());

    for task in graph.tasks() {
        let id = *task.id();
        let record = records[&id].clone();
        // Clone this task's own channels rather than removing them from
        // `channels`: other tasks still need to reach this entry later in
        // the loop, either as an upstream/parent subscription or (for a
        // job) as a child subscription — the map has to stay fully
        // populated for the whole pass.
        let own_channels = channels[&id].clone();

        let upstream_ids = graph.upstream_of(id);
        let trigger = if !upstream_ids.is_empty() {
            let slots = upstream_ids
                .iter()
                .map(|uid| (*uid, records[uid].clone(), channels[uid].output_tx.subscribe()))
                .collect();
            Trigger::Upstream(slots)
        } else if let Some(parent_id) = task.parent_id() {
            Trigger::Parent(channels[parent_id].cmd_tx.subscribe())
        } else {
            Trigger::None
        };

        let merge = graph.merge_strategy_for(id);

        let node = match task.task_type() {
            TaskType::Task => {
                let action = ctx.actions.resolve(task.kind())?;
                let (node, node_handles) =
                    TaskNode::new(id, own_channels, record, ctx.clone(), trigger, merge, action);
                handles.insert(id, node_handles);
                AnyNode::Task(node)
            }
            TaskType::Job => {
                let children = graph
                    .children_of(id)
                    .iter()
                    .map(|cid| (*cid, records[cid].clone(), channels[cid].output_tx.subscribe()))
                    .collect();
                let (node, node_handles) =
                    JobNode::new(id, own_channels, record, ctx.clone(), trigger, merge, children);
                handles.insert(id, node_handles);
                AnyNode::Job(node)
            }
        };
        runnables.push(node);
    }

    if !handles.contains_key(&graph.root_id()) {
        return Err(EngineError::RootNotFound { job_id: graph.root_id() });
    }

    Ok(BuiltGraph { root_id: graph.root_id(), handles, runnables })
}
