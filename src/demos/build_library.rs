//! `BuildLibraryJob`: one leaf task wrapped in a job, reimplemented
//! from `application/build_library_job.py`. The job carries the
//! pricing library name as its own (unused-by-the-engine) input; the
//! leaf does the actual work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::model::{GraphBuilder, TaskRecord, TaskType};
use crate::registry::{ActionRegistry, TaskAction};

pub const KIND: &str = "build_library_task";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingLibrary {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEngine {
    pub name: String,
    pub engine: String,
}

/// Builds a `PricingEngine` by minting an engine identifier for the
/// library name it was given.
pub struct BuildLibraryTask;

#[async_trait]
impl TaskAction for BuildLibraryTask {
    async fn run(&self, input: Option<Value>) -> anyhow::Result<Option<Value>> {
        let input: PricingLibrary = serde_json::from_value(
            input.ok_or_else(|| anyhow::anyhow!("build_library_task requires a PricingLibrary input"))?,
        )?;
        let output = PricingEngine {
            engine: format!("engine-{}-{}", input.name, Uuid::new_v4()),
            name: input.name,
        };
        Ok(Some(serde_json::to_value(output)?))
    }
}

pub fn register(registry: &mut ActionRegistry) {
    registry.register(KIND, std::sync::Arc::new(BuildLibraryTask));
}

/// Attaches a `BuildLibraryJob` under `parent_id`: the job itself plus
/// its single "Building Image" leaf. Returns the job's task id.
pub fn attach(builder: &mut GraphBuilder, parent_id: Uuid, name: &str, input: PricingLibrary) -> EngineResult<Uuid> {
    let mut job = TaskRecord::new("build_library_job", TaskType::Job, Some(name.to_string()), Some(parent_id));
    job.set_input(Some(serde_json::to_value(&input).map_err(anyhow::Error::from)?));
    let job_id = *job.id();
    builder.add_task(job)?;

    let mut leaf = TaskRecord::new(KIND, TaskType::Task, Some("Building Image".to_string()), Some(job_id));
    leaf.set_input(Some(serde_json::to_value(&input).map_err(anyhow::Error::from)?));
    builder.add_task(leaf)?;

    Ok(job_id)
}
