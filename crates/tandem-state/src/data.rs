//! Execution data payloads written by the built-in states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_store::{BarrierState, ExecutionStatus};

/// A spawned child and the correlation id it notifies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRef {
  pub element_name: String,
  pub notify_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<ExecutionStatus>,
}

/// Written by fork and loop-resume states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForkExecutionData {
  pub children: Vec<ChildRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierExecutionData {
  pub identifier: String,
  pub barrier_id: Option<String>,
  pub state: Option<BarrierState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSummary {
  pub instance_id: String,
  pub state_name: String,
  pub status: ExecutionStatus,
  pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubWorkflowExecutionData {
  pub sub_workflow_id: String,
  #[serde(default)]
  pub children: Vec<ChildSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitExecutionData {
  pub duration_secs: u64,
  pub wake_at: DateTime<Utc>,
  pub correlation_id: String,
}
