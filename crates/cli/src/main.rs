//! `taskflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check a workflow JSON file and print its step order.
//! - `run`: execute a workflow file against in-memory stores; webhook and
//!   api actions go over the network unless `--record-http` is given.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use actions::{Collaborators, Variables, handlers::ReqwestTransport};
use engine::{EngineConfig, ExecutionStatus, Orchestrator, StepKind, Workflow, models::ApprovalStepConfig};
use store::InMemoryStore;

#[derive(Parser)]
#[command(name = "taskflow", about = "Workflow orchestration engine", version)]
struct Cli {
    /// Engine configuration file (JSON).
    #[arg(long, global = true, env = "TASKFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "TASKFLOW_MAX_RETRY_ATTEMPTS")]
    max_retry_attempts: Option<u32>,

    #[arg(long, global = true, env = "TASKFLOW_RETRY_BASE_DELAY_MS")]
    retry_base_delay_ms: Option<u64>,

    #[arg(long, global = true, env = "TASKFLOW_MAX_EXECUTION_SECS")]
    max_execution_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow once and print the execution and its step records.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Trigger data as a JSON object.
        #[arg(long)]
        input: Option<String>,
        /// Approve every approval step on behalf of its first approver.
        #[arg(long)]
        auto_approve: bool,
        /// Record webhook and api calls instead of sending them.
        #[arg(long)]
        record_http: bool,
    },
}

impl Cli {
    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(attempts) = self.max_retry_attempts {
            config.max_retry_attempts = attempts;
        }
        if let Some(delay) = self.retry_base_delay_ms {
            config.retry_base_delay_ms = delay;
        }
        if let Some(secs) = self.max_execution_secs {
            config.max_execution_secs = secs;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = cli.engine_config()?;

    match cli.command {
        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            match engine::validate_graph(&workflow) {
                Ok(order) => {
                    println!("✅ Workflow '{}' is valid. Step order:", workflow.name);
                    for id in order {
                        let name = workflow.step_by_id(id).map_or("?", |s| s.name.as_str());
                        println!("  {id}  {name}");
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Run { path, input, auto_approve, record_http } => {
            config.auto_approve |= auto_approve;
            run(&path, input.as_deref(), config, collaborators(record_http)).await
        }
    }
}

fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

/// In-memory ports, with real HTTP unless `record_http` is set.
fn collaborators(record_http: bool) -> Collaborators {
    let mut collaborators = Collaborators::in_memory();
    if !record_http {
        collaborators.http = Arc::new(ReqwestTransport::new());
    }
    collaborators
}

async fn run(
    path: &Path,
    input: Option<&str>,
    config: EngineConfig,
    collaborators: Collaborators,
) -> anyhow::Result<ExitCode> {
    let mut workflow = load_workflow(path)?;
    let runner = workflow.owner_id;
    workflow.activate(runner).context("workflow failed validation")?;

    let waits_for_approval = workflow
        .steps
        .iter()
        .any(|s| matches!(s.kind, StepKind::Approval(ApprovalStepConfig { auto_approve: false })));
    if waits_for_approval && !config.auto_approve {
        warn!("workflow has approval steps and nothing will decide them; pass --auto-approve");
    }

    let trigger_data = match input {
        Some(raw) => {
            let value = serde_json::from_str(raw).context("--input must be valid JSON")?;
            Variables::from_value(value)?
        }
        None => Variables::new(),
    };

    let store = Arc::new(InMemoryStore::new());
    let orchestrator = Orchestrator::builder(store.clone(), store)
        .collaborators(collaborators)
        .config(config)
        .build();
    orchestrator.create_workflow(&workflow).await?;

    let started = orchestrator.start_workflow(workflow.id, runner, trigger_data).await?;
    info!(execution_id = %started.id, "waiting for execution");
    let finished = orchestrator.wait_for(started.id).await?;
    let steps = orchestrator.list_step_executions(finished.id).await?;

    let report = json!({ "execution": finished, "steps": steps });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if finished.status == ExecutionStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
