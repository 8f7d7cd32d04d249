//! `NightBatchJob`: the full end-to-end demo graph, reimplemented from
//! `application/night_batch_job.py`. A `Start` seed task fans out into
//! two `BuildLibraryJob`s (candidate/reference), each feeding its own
//! `MultiPriceJob`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineResult;
use crate::merge::MapperRegistry;
use crate::model::{GraphBuilder, JobGraph, TaskRecord, TaskType};
use crate::registry::{ActionRegistry, TaskAction};

use super::build_library::{self, PricingLibrary};
use super::multi_price::{self, TriggerMultiPriceInput};

pub const START_KIND: &str = "night_batch_start";

/// Does nothing but mark itself started and finished; a pure
/// fan-out seed.
pub struct Start;

#[async_trait]
impl TaskAction for Start {
    async fn run(&self, _input: Option<Value>) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

pub fn register(registry: &mut ActionRegistry) {
    registry.register(START_KIND, std::sync::Arc::new(Start));
    build_library::register(registry);
    multi_price::register(registry);
}

pub fn register_mappers(mappers: &mut MapperRegistry) {
    multi_price::register_mappers(mappers);
}

/// Everything `register`/`register_mappers` populate, bundled for
/// demo/test callers that don't need to build the registries
/// themselves.
pub fn registries() -> (ActionRegistry, MapperRegistry) {
    let mut actions = ActionRegistry::new();
    let mut mappers = MapperRegistry::new();
    register(&mut actions);
    register_mappers(&mut mappers);
    (actions, mappers)
}

/// Builds the graph: `start -> {candidate_engine, reference_engine}`,
/// `candidate_engine -> candidate_pricing`, `reference_engine ->
/// reference_pricing`.
pub fn build() -> EngineResult<JobGraph> {
    let root = TaskRecord::new("night_batch_job", TaskType::Job, Some("Night Batch Job".to_string()), None);
    let root_id = *root.id();
    let mut builder = GraphBuilder::new(root);

    let start = TaskRecord::new(START_KIND, TaskType::Task, Some("Start".to_string()), Some(root_id));
    let start_id = *start.id();
    builder.add_task(start)?;

    let candidate_engine = build_library::attach(
        &mut builder,
        root_id,
        "Building Candidate Image Job",
        PricingLibrary { name: "1.0.0-candidate".to_string() },
    )?;
    let reference_engine = build_library::attach(
        &mut builder,
        root_id,
        "Building Reference Image Job",
        PricingLibrary { name: "2.0.0-reference".to_string() },
    )?;

    builder.add_downstream(root_id, start_id, &[candidate_engine, reference_engine])?;

    let reference_pricing = multi_price::attach(
        &mut builder,
        root_id,
        "Reference Pricing Job",
        TriggerMultiPriceInput { collation_id: "reference-collation-id".to_string() },
    )?;
    let candidate_pricing = multi_price::attach(
        &mut builder,
        root_id,
        "Candidate Pricing Job",
        TriggerMultiPriceInput { collation_id: "candidate-collation-id".to_string() },
    )?;

    builder.add_upstream(root_id, reference_pricing, &[reference_engine], crate::merge::MergeStrategy::Replace, None)?;
    builder.add_upstream(root_id, candidate_pricing, &[candidate_engine], crate::merge::MergeStrategy::Replace, None)?;

    Ok(builder.build())
}

/// Task id of the given top-level child, by name, for tests and the
/// demo CLI's `retry` subcommand — a thin convenience over walking
/// `JobGraph::children_of` since callers rarely want to hand-carry a
/// `Uuid` across a `register`/`build` call pair.
pub fn find_child<'a>(graph: &'a JobGraph, name: &str) -> Option<&'a TaskRecord> {
    graph
        .children_of(graph.root_id())
        .iter()
        .filter_map(|id| graph.task(*id))
        .find(|t| t.name().as_deref() == Some(name))
}
