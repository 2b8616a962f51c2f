use tandem_barrier::BarrierError;
use tandem_state::StateError;
use tandem_store::StoreError;
use tandem_waiter::WaitError;
use tandem_workflow::WorkflowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("failed to read config {path}: {source}")]
  ConfigRead {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config: {0}")]
  ConfigParse(#[from] serde_json::Error),

  #[error("invalid workflow: {0}")]
  Workflow(#[from] WorkflowError),

  #[error("state error: {0}")]
  State(#[from] StateError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("wait error: {0}")]
  Wait(#[from] WaitError),

  #[error("barrier error: {0}")]
  Barrier(#[from] BarrierError),

  #[error("workflow not loaded: {0}")]
  UnknownWorkflow(String),

  #[error("pipeline not loaded: {0}")]
  UnknownPipeline(String),

  #[error("pipeline '{pipeline}' has no stage '{stage}'")]
  UnknownStage { pipeline: String, stage: String },

  #[error("execution {0} is not tracked by this engine")]
  NotTracked(String),

  #[error("engine is already running")]
  AlreadyRunning,
}
