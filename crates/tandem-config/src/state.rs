use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::timeout::TimeoutPolicy;

/// A single configured state within a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
  pub name: String,
  #[serde(flatten)]
  pub state_type: StateType,
  #[serde(default, skip_serializing_if = "TimeoutPolicy::is_default")]
  pub timeout: TimeoutPolicy,
}

impl StateDef {
  pub fn new(name: impl Into<String>, state_type: StateType) -> Self {
    Self {
      name: name.into(),
      state_type,
      timeout: TimeoutPolicy::Default,
    }
  }

  pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn kind(&self) -> StateKind {
    self.state_type.kind()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateType {
  /// A plain unit of work, implemented by a registered step factory.
  Step {
    step_type: String,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
  },
  /// Runs every named child state in parallel and joins on all of them.
  Fork { children: Vec<String> },
  /// Rendezvous with other workflows of the same pipeline execution.
  Barrier { identifier: String },
  /// Delegates to a nested state graph.
  SubWorkflow { sub_workflow_id: String },
  /// Suspends for a fixed duration.
  Wait { duration_secs: u64 },
  /// Replays the result of a state from a previous pipeline execution.
  EnvResume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_pipeline_execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_state_execution_id: Option<String>,
  },
  /// Fans out one `env_resume` child per previous workflow execution.
  EnvLoopResume {
    /// Name of the `env_resume` state every child runs.
    resume_state: String,
    prev_pipeline_execution_id: String,
    /// previous workflow execution id -> previous state execution id
    prev_executions: BTreeMap<String, String>,
  },
}

impl StateType {
  pub fn kind(&self) -> StateKind {
    match self {
      StateType::Step { .. } => StateKind::Step,
      StateType::Fork { .. } => StateKind::Fork,
      StateType::Barrier { .. } => StateKind::Barrier,
      StateType::SubWorkflow { .. } => StateKind::SubWorkflow,
      StateType::Wait { .. } => StateKind::Wait,
      StateType::EnvResume { .. } => StateKind::EnvResume,
      StateType::EnvLoopResume { .. } => StateKind::EnvLoopResume,
    }
  }
}

/// Parameterless tag of a [`StateType`], stored on execution records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
  Step,
  Fork,
  Barrier,
  SubWorkflow,
  Wait,
  EnvResume,
  EnvLoopResume,
}

impl StateKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      StateKind::Step => "step",
      StateKind::Fork => "fork",
      StateKind::Barrier => "barrier",
      StateKind::SubWorkflow => "sub_workflow",
      StateKind::Wait => "wait",
      StateKind::EnvResume => "env_resume",
      StateKind::EnvLoopResume => "env_loop_resume",
    }
  }

  /// Resume kinds use the engine's resume timeout instead of the generic default.
  pub fn is_resume(&self) -> bool {
    matches!(self, StateKind::EnvResume | StateKind::EnvLoopResume)
  }
}

impl fmt::Display for StateKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
