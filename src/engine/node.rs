//! The two reactive actors the engine wires into a graph: [`TaskNode`]
//! (a leaf) and [`JobNode`] (a composite whose status is always folded
//! from its children). Both are grounded on the same shape the teacher
//! uses for its own `JobTask` in `orchestrator/orchestrator.rs`: hold a
//! `watch`/`subject`-style channel, react to upstream completions, run
//! an action, and publish the outcome for whoever is downstream.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::{is_retry, is_setup, Event, EventType};
use crate::merge::{merge_outputs, MapperRegistry, MergeStrategy};
use crate::model::{TaskRecord, TaskType};
use crate::registry::{ActionRegistry, TaskAction};
use crate::repository::JobRepository;
use crate::status::Status;

use super::combine::CombineLatest;

/// Everything a node needs to reach outside itself: the repository,
/// the per-job serialization lock (§5), and the static registries.
pub struct EngineContext {
    pub job_lock: Arc<Mutex<()>>,
    pub repository: Arc<dyn JobRepository>,
    pub actions: Arc<ActionRegistry>,
    pub mappers: Arc<MapperRegistry>,
    pub config: EngineConfig,
}

type UpstreamSlot = (Uuid, Arc<RwLock<TaskRecord>>, watch::Receiver<Event>);

/// What a node listens to in order to know when to re-evaluate itself.
pub enum Trigger {
    /// No upstream for this node within its job: it is that job's
    /// "root" child, so it listens to the enclosing job's own command
    /// channel instead.
    Parent(watch::Receiver<Event>),
    /// One or more upstream nodes, in edge-declaration order.
    Upstream(Vec<UpstreamSlot>),
    /// The engine's own root: no parent, no upstream.
    None,
}

/// What the engine keeps around for a node after it has been spawned:
/// enough to observe it (for the overall "is the run done" check) and
/// to retry it.
pub struct NodeHandles {
    pub id: Uuid,
    pub task_type: TaskType,
    pub record: Arc<RwLock<TaskRecord>>,
    pub cmd_tx: watch::Sender<Event>,
    pub output_rx: watch::Receiver<Event>,
    pub ctx: Arc<EngineContext>,
}

impl NodeHandles {
    /// Reopens a finished task: pushes `RETRY` onto its command
    /// channel, waits for things to settle, then pushes `RUN`. Only a
    /// [`TaskNode`] includes its own command channel among its trigger
    /// sources (see [`JobNode::run`]'s doc comment for why a job
    /// deliberately does not), so this is functionally a leaf-task
    /// operation: calling it against a job id leaves that job's own
    /// status untouched, matching the source's `ReactiveTask.retry`
    /// being defined once on the shared base class without every
    /// subclass's trigger pipeline actually consuming it. Retrying a
    /// leaf still reaches every downstream dependent, since they
    /// observe the `RETRY` then `RUN` events on *its* output and
    /// re-evaluate their own trigger in turn.
    pub async fn retry(&self) -> Result<(), EngineError> {
        let delay = self.ctx.config.retry_settle_delay();
        let status_now = *self.record.read().await.status();
        let _ = self.cmd_tx.send(Event::new(self.id, status_now, EventType::Retry));
        tokio::time::sleep(delay).await;
        let status_after = *self.record.read().await.status();
        let _ = self.cmd_tx.send(Event::new(self.id, status_after, EventType::Run));
        Ok(())
    }
}

/// Plumbing shared by [`TaskNode`] and [`JobNode`]: the record, the
/// command channel ("subject"), and the published output channel
/// ("observable").
struct NodeShared {
    id: Uuid,
    record: Arc<RwLock<TaskRecord>>,
    ctx: Arc<EngineContext>,
    cmd_tx: watch::Sender<Event>,
    cmd_rx: watch::Receiver<Event>,
    output_tx: watch::Sender<Event>,
}

/// A node's channels, pre-allocated before any node is assembled so
/// that a job's children can hold a subscription to the job's own
/// command channel (and vice versa: a job can hold a subscription to
/// each child's output channel) regardless of build order. `Clone`
/// because the graph builder hands a node its own copy while leaving
/// the original in its lookup map — other tasks still need to reach it
/// for their own subscriptions after this node has been assembled.
#[derive(Clone)]
pub struct NodeChannels {
    pub cmd_tx: watch::Sender<Event>,
    pub cmd_rx: watch::Receiver<Event>,
    pub output_tx: watch::Sender<Event>,
}

pub fn new_channels(id: Uuid, initial_status: Status) -> NodeChannels {
    let seed = Event::new(id, initial_status, EventType::None);
    let (cmd_tx, cmd_rx) = watch::channel(seed.clone());
    let (output_tx, _output_rx) = watch::channel(seed);
    NodeChannels { cmd_tx, cmd_rx, output_tx }
}

impl NodeShared {
    fn new(id: Uuid, record: Arc<RwLock<TaskRecord>>, ctx: Arc<EngineContext>, channels: NodeChannels) -> Self {
        NodeShared {
            id,
            record,
            ctx,
            cmd_tx: channels.cmd_tx,
            cmd_rx: channels.cmd_rx,
            output_tx: channels.output_tx,
        }
    }

    fn subscribe_output(&self) -> watch::Receiver<Event> {
        self.output_tx.subscribe()
    }

    fn publish_cmd(&self, status: Status, event_type: EventType) {
        let _ = self.cmd_tx.send(Event::new(self.id, status, event_type));
    }

    fn publish_output(&self, status: Status, event_type: EventType) {
        let _ = self.output_tx.send(Event::new(self.id, status, event_type));
    }

    async fn current_status(&self) -> Status {
        *self.record.read().await.status()
    }

    /// Acquire the job lock, mutate the record, write it through, then
    /// flush and commit. Never held across an action's `run()` (§5).
    async fn mutate(&self, f: impl FnOnce(&mut TaskRecord)) -> anyhow::Result<()> {
        let _guard = self.ctx.job_lock.lock().await;
        let snapshot = {
            let mut rec = self.record.write().await;
            f(&mut rec);
            rec.clone()
        };
        self.ctx.repository.save_task(&snapshot).await?;
        self.ctx.repository.flush().await?;
        self.ctx.repository.commit().await?;
        Ok(())
    }
}

/// `status == SCHEDULED|READY_TO_RETRY` and not finished, and every
/// upstream task (if any) has reached `SUCCESS` (§4.1, using the
/// `Task`-level definition per the §9 Open Question resolution, not
/// the stricter one from the dependency mixin).
async fn is_runnable(record: &Arc<RwLock<TaskRecord>>, upstream: &[UpstreamSlot]) -> bool {
    {
        let rec = record.read().await;
        if rec.is_finished() || *rec.status() == Status::Running {
            return false;
        }
    }
    for (_, up_record, _) in upstream {
        if *up_record.read().await.status() != Status::Success {
            return false;
        }
    }
    true
}

fn handles_for(shared: &NodeShared, task_type: TaskType) -> NodeHandles {
    NodeHandles {
        id: shared.id,
        task_type,
        record: shared.record.clone(),
        cmd_tx: shared.cmd_tx.clone(),
        output_rx: shared.subscribe_output(),
        ctx: shared.ctx.clone(),
    }
}

/// A leaf task: runs its [`TaskAction`] exactly once it becomes
/// runnable, per handler contract §4.3.
pub struct TaskNode {
    shared: NodeShared,
    trigger: Trigger,
    merge: Option<(MergeStrategy, Option<String>)>,
    action: Arc<dyn TaskAction>,
}

impl TaskNode {
    pub fn new(
        id: Uuid,
        channels: NodeChannels,
        record: Arc<RwLock<TaskRecord>>,
        ctx: Arc<EngineContext>,
        trigger: Trigger,
        merge: Option<(MergeStrategy, Option<String>)>,
        action: Arc<dyn TaskAction>,
    ) -> (Self, NodeHandles) {
        let shared = NodeShared::new(id, record, ctx, channels);
        let handles = handles_for(&shared, TaskType::Task);
        (TaskNode { shared, trigger, merge, action }, handles)
    }

    pub async fn run(self) {
        let mut sources = vec![self.shared.cmd_rx.clone()];
        match &self.trigger {
            Trigger::Parent(rx) => sources.push(rx.clone()),
            Trigger::Upstream(ups) => sources.extend(ups.iter().map(|(_, _, rx)| rx.clone())),
            Trigger::None => {}
        }
        let mut combine = CombineLatest::spawn(sources, self.shared.ctx.config.combine_channel_capacity);
        let initial = combine.latest().to_vec();
        self.handle(&initial).await;
        while let Some(events) = combine.next().await {
            let events = events.to_vec();
            self.handle(&events).await;
        }
    }

    async fn handle(&self, events: &[Event]) {
        if is_setup(events) {
            let status = self.shared.current_status().await;
            self.shared.publish_output(status, EventType::Setup);
            return;
        }

        let own_cmd_type = self.shared.cmd_rx.borrow().event_type;
        if is_retry(events) && own_cmd_type != EventType::Run {
            tracing::debug!(task_id = %self.shared.id, "task reopened for retry");
            let _ = self.shared.mutate(|r| { r.set_status(Status::ReadyToRetry); }).await;
            self.shared.publish_output(Status::ReadyToRetry, EventType::Retry);
            return;
        }

        let upstream: &[UpstreamSlot] = match &self.trigger {
            Trigger::Upstream(ups) => ups.as_slice(),
            _ => &[],
        };

        if is_runnable(&self.shared.record, upstream).await {
            if let Err(err) = self.execute(upstream).await {
                let message = err.to_string();
                tracing::warn!(task_id = %self.shared.id, error = %message, "task action failed");
                let _ = self
                    .shared
                    .mutate(|r| {
                        r.set_error(Some(message));
                        r.set_status(Status::Failed);
                        r.mark_finished(Utc::now());
                    })
                    .await;
                self.shared.publish_output(Status::Failed, EventType::Failed);
                return;
            }
        }

        let status = self.shared.current_status().await;
        self.shared.publish_output(status, EventType::Run);
    }

    async fn execute(&self, upstream: &[UpstreamSlot]) -> anyhow::Result<()> {
        if !upstream.is_empty() {
            let mut outputs = Vec::with_capacity(upstream.len());
            for (_, rec, _) in upstream {
                outputs.push(rec.read().await.output().clone());
            }
            let (strategy, mapper) = self.merge.clone().unwrap_or((MergeStrategy::Replace, None));
            let merged = merge_outputs(self.shared.id, &outputs, strategy, mapper.as_deref(), &self.shared.ctx.mappers)?;
            self.shared.mutate(|r| { r.set_input(merged); }).await?;
        }

        self.shared
            .mutate(|r| {
                r.set_status(Status::Running);
                r.mark_started(Utc::now());
            })
            .await?;

        let (input, kind) = {
            let rec = self.shared.record.read().await;
            (rec.input().clone(), rec.kind().clone())
        };

        match self.action.run(input).await {
            Ok(output) => {
                self.shared
                    .mutate(|r| {
                        r.set_output(output);
                        r.set_status(Status::Success);
                        r.mark_finished(Utc::now());
                    })
                    .await?;
                Ok(())
            }
            Err(source) => Err(EngineError::ActionFailed { kind, source }.into()),
        }
    }
}

/// A job: never runs an action itself; its status and output are
/// always folded from its children (§4.4, invariant 6 of §3).
pub struct JobNode {
    shared: NodeShared,
    trigger: Trigger,
    merge: Option<(MergeStrategy, Option<String>)>,
    children: Vec<UpstreamSlot>,
}

impl JobNode {
    pub fn new(
        id: Uuid,
        channels: NodeChannels,
        record: Arc<RwLock<TaskRecord>>,
        ctx: Arc<EngineContext>,
        trigger: Trigger,
        merge: Option<(MergeStrategy, Option<String>)>,
        children: Vec<UpstreamSlot>,
    ) -> (Self, NodeHandles) {
        let shared = NodeShared::new(id, record, ctx, channels);
        let handles = handles_for(&shared, TaskType::Job);
        (JobNode { shared, trigger, merge, children }, handles)
    }

    pub async fn run(self) {
        // Unlike a leaf, a job's own command channel is never one of
        // its own trigger sources: that channel exists purely to fan
        // `RUN`/`SETUP`/`RETRY` out to this job's own no-upstream
        // children (whoever holds `Trigger::Parent(this)`). Folding it
        // back into this job's own trigger would make every
        // `publish_cmd` call below immediately re-wake this same loop.
        // A job is driven only by its parent or its upstream; `retry()`
        // against a job id is therefore a no-op on the job itself (it
        // still reaches a leaf retry target fine) — this mirrors the
        // source's `ReactiveJob._get_observable`, which never includes
        // `self.subject` in its trigger pipeline either.
        let trigger_sources: Vec<watch::Receiver<Event>> = match &self.trigger {
            Trigger::Parent(rx) => vec![rx.clone()],
            Trigger::Upstream(ups) => ups.iter().map(|(_, _, rx)| rx.clone()).collect(),
            Trigger::None => Vec::new(),
        };
        let children_sources: Vec<watch::Receiver<Event>> = self.children.iter().map(|(_, _, rx)| rx.clone()).collect();

        let capacity = self.shared.ctx.config.combine_channel_capacity;
        let mut trigger_combine = if trigger_sources.is_empty() { None } else { Some(CombineLatest::spawn(trigger_sources, capacity)) };
        let mut children_combine = CombineLatest::spawn(children_sources, capacity);

        let mut latest_stage1: Option<Event> = match &trigger_combine {
            Some(tc) => Some(self.classify_trigger(tc.latest()).await),
            None => None,
        };
        self.fold(latest_stage1.as_ref(), children_combine.latest()).await;

        loop {
            let trigger_wait = async {
                match &mut trigger_combine {
                    Some(tc) => tc.next().await.map(|e| e.to_vec()),
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                trig = trigger_wait => {
                    match trig {
                        Some(events) => {
                            let stage1 = self.classify_trigger(&events).await;
                            latest_stage1 = Some(stage1);
                            self.fold(latest_stage1.as_ref(), children_combine.latest()).await;
                        }
                        None => break,
                    }
                }
                ch = children_combine.next() => {
                    match ch {
                        Some(events) => {
                            let events = events.to_vec();
                            self.fold(latest_stage1.as_ref(), &events).await;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// Stage 1: decides whether this job is being told to reopen, to
    /// stay quiescent, or to start — mirrors the leaf handler's own
    /// gating but never runs an action, and (unlike the leaf) never
    /// reads its own command channel as an input: only the parent or
    /// upstream nodes can drive this job's trigger.
    async fn classify_trigger(&self, events: &[Event]) -> Event {
        if is_retry(events) {
            let _ = self.shared.mutate(|r| { r.set_status(Status::ReadyToRetry); }).await;
            let status = self.shared.current_status().await;
            self.shared.publish_cmd(status, EventType::Retry);
            return Event::new(self.shared.id, status, EventType::Retry);
        }

        let upstream: &[UpstreamSlot] = match &self.trigger {
            Trigger::Upstream(ups) => ups.as_slice(),
            _ => &[],
        };
        let runnable = is_runnable(&self.shared.record, upstream).await;

        if is_setup(events) || !runnable {
            let status = self.shared.current_status().await;
            self.shared.publish_cmd(status, EventType::Setup);
            return Event::new(self.shared.id, status, EventType::Setup);
        }

        if !upstream.is_empty() {
            let mut outputs = Vec::with_capacity(upstream.len());
            for (_, rec, _) in upstream {
                outputs.push(rec.read().await.output().clone());
            }
            let (strategy, mapper) = self.merge.clone().unwrap_or((MergeStrategy::Replace, None));
            if let Ok(merged) = merge_outputs(self.shared.id, &outputs, strategy, mapper.as_deref(), &self.shared.ctx.mappers) {
                let _ = self.shared.mutate(|r| { r.set_input(merged); }).await;
            }
        }

        let _ = self.shared.mutate(|r| r.mark_started(Utc::now())).await;
        let status = self.shared.current_status().await;
        self.shared.publish_cmd(status, EventType::Run);
        Event::new(self.shared.id, status, EventType::Run)
    }

    /// Stage 2: fold every child's live status into this job's own
    /// status and output, then republish for whoever is downstream.
    async fn fold(&self, stage1: Option<&Event>, child_events: &[Event]) {
        let mut statuses = Vec::with_capacity(self.children.len());
        let mut outputs = Vec::with_capacity(self.children.len());
        for (_, rec, _) in &self.children {
            let r = rec.read().await;
            statuses.push(*r.status());
            outputs.push(r.output().clone());
        }
        let folded = Status::compute(statuses);
        let current = self.shared.current_status().await;

        if folded.is_final() && current != folded {
            let _ = self.shared.mutate(|r| r.mark_finished(Utc::now())).await;
        }
        let output_list = Value::Array(outputs.into_iter().map(|o| o.unwrap_or(Value::Null)).collect());
        let _ = self
            .shared
            .mutate(|r| {
                r.set_status(folded);
                r.set_output(Some(output_list));
            })
            .await;

        let mut all_events: Vec<Event> = Vec::with_capacity(1 + child_events.len());
        if let Some(s1) = stage1 {
            all_events.push(s1.clone());
        }
        all_events.extend(child_events.iter().cloned());

        let event_type = if is_retry(&all_events) {
            EventType::Retry
        } else if is_setup(&all_events) {
            EventType::Setup
        } else {
            EventType::Run
        };
        self.shared.publish_output(folded, event_type);
    }
}

/// Either kind of node, for the graph builder to spawn uniformly.
pub enum AnyNode {
    Task(TaskNode),
    Job(JobNode),
}

impl AnyNode {
    pub async fn run(self) {
        match self {
            AnyNode::Task(node) => node.run().await,
            AnyNode::Job(node) => node.run().await,
        }
    }
}
