//! Demo binary: builds the `night_batch` fixture graph, runs it to
//! completion against an in-memory repository, and optionally retries
//! one of its top-level jobs — a CLI-sized stand-in for the HTTP
//! trigger surface this crate's scope (SPEC §1) leaves to an
//! application layer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cascade::{EngineConfig, EngineRegistry, InMemoryRepository, JobRepository};
use cascade::demos::night_batch;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "cascade-demo", about = "Run the reactive execution engine's bundled demo jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the night_batch demo job to completion.
    Run,
    /// Run the night_batch demo job, then retry one of its top-level
    /// children by name (e.g. "Building Candidate Image Job").
    Retry {
        #[arg(long)]
        task: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let repository: Arc<dyn JobRepository> = Arc::new(InMemoryRepository::new());
    let graph = night_batch::build()?;
    let job_id = graph.root_id();
    let retry_target = match &cli.command {
        Command::Retry { task } => Some(
            night_batch::find_child(&graph, task)
                .ok_or_else(|| anyhow!("no top-level task named '{task}' in the night_batch demo"))?
                .id()
                .to_owned(),
        ),
        Command::Run => None,
    };
    repository.add(graph).await?;

    let config = EngineConfig::load().context("loading engine configuration")?;
    let (actions, mappers) = night_batch::registries();
    let registry = EngineRegistry::new();
    let engine = registry
        .get_or_create(job_id, || cascade::Engine::new(job_id, repository.clone(), Arc::new(actions), Arc::new(mappers), config))
        .await;

    let bar = spinner(&format!("running night_batch job {job_id}"));
    let status = engine.run().await.context("engine run failed")?;
    bar.finish_with_message(format!("night_batch job finished: {status}"));

    if let Some(task_id) = retry_target {
        let bar = spinner(&format!("retrying task {task_id}"));
        engine.retry(task_id).await.context("retry failed")?;
        wait_for_stable(&engine, task_id).await?;
        let status = engine.status_of(task_id).await?;
        bar.finish_with_message(format!("task {task_id} settled at {status}"));
    }

    engine.shutdown().await?;
    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Polls until the retried task reaches a final status again, since
/// `Engine::retry` only injects the `RETRY`/`RUN` events and returns
/// without waiting for the resulting re-run to settle.
async fn wait_for_stable(engine: &cascade::Engine, task_id: Uuid) -> Result<()> {
    loop {
        let status = engine.status_of(task_id).await?;
        if status.is_final() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
