use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tandem_config::Definitions;
use tandem_engine::{Engine, EngineConfig, ExecutionArgs};
use tandem_store::InMemoryStore;

/// Tandem - a resumable state-machine orchestrator
#[derive(Parser)]
#[command(name = "tandem")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the engine config (default: ~/.tandem/config.json when present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log at debug level unless RUST_LOG is set
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow or pipeline
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },

  /// Validate a definitions file and list what it contains
  Check {
    /// Path to the definitions file (JSON)
    definitions: PathBuf,
  },
}

#[derive(Subcommand)]
enum RunTarget {
  /// Run one workflow to completion
  Workflow {
    /// Path to the definitions file (JSON)
    definitions: PathBuf,

    /// The workflow id to run
    workflow_id: String,
  },

  /// Run a pipeline to completion
  Pipeline {
    /// Path to the definitions file (JSON)
    definitions: PathBuf,

    /// The pipeline id to run
    pipeline_id: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
    .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
    .init();

  let config = load_config(cli.config.as_deref())?;

  match cli.command {
    Some(Commands::Run { target }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run(target, config).await })?;
    }
    Some(Commands::Check { definitions }) => check(&definitions, config)?,
    None => {
      println!("tandem - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
  if let Some(path) = path {
    return EngineConfig::from_file(path)
      .with_context(|| format!("failed to load config: {}", path.display()));
  }

  let Some(default) = dirs::home_dir().map(|home| home.join(".tandem").join("config.json")) else {
    return Ok(EngineConfig::default());
  };
  if default.exists() {
    EngineConfig::from_file(&default)
      .with_context(|| format!("failed to load config: {}", default.display()))
  } else {
    Ok(EngineConfig::default())
  }
}

fn load_engine(definitions: &Path, config: EngineConfig) -> Result<Engine> {
  let defs = Definitions::from_file(definitions)
    .with_context(|| format!("failed to read definitions: {}", definitions.display()))?;
  let engine = Engine::new(config, Arc::new(InMemoryStore::new()));
  engine
    .load_definitions(defs)
    .context("invalid definitions")?;
  Ok(engine)
}

fn check(definitions: &Path, config: EngineConfig) -> Result<()> {
  let engine = load_engine(definitions, config)?;
  for workflow_id in engine.workflows() {
    println!("workflow {workflow_id}");
  }
  for pipeline_id in engine.pipelines() {
    println!("pipeline {pipeline_id}");
  }
  Ok(())
}

async fn run(target: RunTarget, config: EngineConfig) -> Result<()> {
  let (definitions, id) = match &target {
    RunTarget::Workflow {
      definitions,
      workflow_id,
    } => (definitions, workflow_id),
    RunTarget::Pipeline {
      definitions,
      pipeline_id,
    } => (definitions, pipeline_id),
  };
  let engine = load_engine(definitions, config)?;

  let cancel = CancellationToken::new();
  engine.run(cancel.clone()).context("failed to start engine")?;

  let args = ExecutionArgs {
    variables: read_variables_from_stdin()?.into_iter().collect(),
    ..Default::default()
  };

  let (output, succeeded) = match target {
    RunTarget::Workflow { .. } => {
      let execution_id = engine
        .start(id, args)
        .await
        .context("failed to start workflow")?;
      eprintln!("Started execution: {execution_id}");
      let execution = engine
        .wait_for(&execution_id)
        .await
        .context("workflow execution failed")?;
      (
        serde_json::to_string_pretty(&execution)?,
        execution.status.is_positive(),
      )
    }
    RunTarget::Pipeline { .. } => {
      let run = engine
        .run_pipeline(id, args)
        .await
        .context("pipeline execution failed")?;
      (serde_json::to_string_pretty(&run)?, run.status.is_positive())
    }
  };

  cancel.cancel();
  println!("{output}");
  if !succeeded {
    bail!("{id} did not succeed");
  }
  Ok(())
}

/// Workflow variables as a JSON object on stdin; empty when stdin is a
/// terminal or blank.
fn read_variables_from_stdin() -> Result<serde_json::Map<String, Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read variables from stdin")?;
  if input.trim().is_empty() {
    return Ok(serde_json::Map::new());
  }
  serde_json::from_str(&input).context("failed to parse variables JSON from stdin")
}
