//! `MultiPriceJob`: a trigger leaf feeding a collation leaf through a
//! `CUSTOM` merge, reimplemented from `application/multi_price_job.py`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::merge::{MapperRegistry, MergeStrategy};
use crate::model::{GraphBuilder, TaskRecord, TaskType};
use crate::registry::{ActionRegistry, TaskAction};

pub const TRIGGER_KIND: &str = "trigger_multi_price";
pub const COLLATION_KIND: &str = "collation_multi_price";
pub const MAPPER_NAME: &str = "multi_price_pick_first";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMultiPriceInput {
    pub collation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMultiPriceOut {
    pub collation_id: String,
    pub status: String,
}

/// Passes its input straight through as output.
pub struct TriggerMultiPrice;

#[async_trait]
impl TaskAction for TriggerMultiPrice {
    async fn run(&self, input: Option<Value>) -> anyhow::Result<Option<Value>> {
        Ok(input)
    }
}

/// Marks the collation run as `OK`, keeping the upstream `collation_id`.
pub struct CollationMultiPrice;

#[async_trait]
impl TaskAction for CollationMultiPrice {
    async fn run(&self, input: Option<Value>) -> anyhow::Result<Option<Value>> {
        let input: TriggerMultiPriceInput = serde_json::from_value(
            input.ok_or_else(|| anyhow::anyhow!("collation_multi_price requires a TriggerMultiPriceInput input"))?,
        )?;
        let output = TriggerMultiPriceOut { collation_id: input.collation_id, status: "OK".to_string() };
        Ok(Some(serde_json::to_value(output)?))
    }
}

pub fn register(registry: &mut ActionRegistry) {
    registry.register(TRIGGER_KIND, std::sync::Arc::new(TriggerMultiPrice));
    registry.register(COLLATION_KIND, std::sync::Arc::new(CollationMultiPrice));
}

pub fn register_mappers(mappers: &mut MapperRegistry) {
    mappers.register(MAPPER_NAME, |upstream: &[Option<Value>]| Ok(upstream.first().cloned().flatten()));
}

/// Attaches a `MultiPriceJob` under `parent_id`: the job, its trigger
/// leaf, and its collation leaf (`CUSTOM`-merged from the trigger's
/// output). Returns the job's task id.
pub fn attach(builder: &mut GraphBuilder, parent_id: Uuid, name: &str, input: TriggerMultiPriceInput) -> EngineResult<Uuid> {
    let job = TaskRecord::new("multi_price_job", TaskType::Job, Some(name.to_string()), Some(parent_id));
    let job_id = *job.id();
    builder.add_task(job)?;

    let mut trigger = TaskRecord::new(TRIGGER_KIND, TaskType::Task, Some("Trigger Pricing".to_string()), Some(job_id));
    trigger.set_input(Some(serde_json::to_value(&input).map_err(anyhow::Error::from)?));
    let trigger_id = *trigger.id();
    builder.add_task(trigger)?;

    let collation = TaskRecord::new(COLLATION_KIND, TaskType::Task, Some("Collation Pricing".to_string()), Some(job_id));
    let collation_id = *collation.id();
    builder.add_task(collation)?;

    builder.add_upstream(job_id, collation_id, &[trigger_id], MergeStrategy::Custom, Some(MAPPER_NAME))?;

    Ok(job_id)
}
