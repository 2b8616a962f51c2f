use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a state execution instance or a workflow execution.
///
/// Transitions are monotonic toward the final set
/// {Success, Failed, Error, Skipped, Aborted}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  New,
  Running,
  Waiting,
  Paused,
  Success,
  Failed,
  Error,
  Skipped,
  Aborted,
}

impl ExecutionStatus {
  pub const ACTIVE: [ExecutionStatus; 4] = [
    ExecutionStatus::New,
    ExecutionStatus::Running,
    ExecutionStatus::Waiting,
    ExecutionStatus::Paused,
  ];

  pub fn is_final(&self) -> bool {
    matches!(
      self,
      ExecutionStatus::Success
        | ExecutionStatus::Failed
        | ExecutionStatus::Error
        | ExecutionStatus::Skipped
        | ExecutionStatus::Aborted
    )
  }

  /// Outcomes that follow the success transition.
  pub fn is_positive(&self) -> bool {
    matches!(self, ExecutionStatus::Success | ExecutionStatus::Skipped)
  }

  /// Outcomes that follow the failure transition.
  pub fn is_broken(&self) -> bool {
    matches!(self, ExecutionStatus::Failed | ExecutionStatus::Error)
  }

  /// Rank used to pick one status among several failing children.
  pub fn severity(&self) -> u8 {
    match self {
      ExecutionStatus::Error => 5,
      ExecutionStatus::Failed => 4,
      ExecutionStatus::Aborted => 3,
      ExecutionStatus::Skipped => 2,
      ExecutionStatus::Success => 0,
      _ => 1,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionStatus::New => "NEW",
      ExecutionStatus::Running => "RUNNING",
      ExecutionStatus::Waiting => "WAITING",
      ExecutionStatus::Paused => "PAUSED",
      ExecutionStatus::Success => "SUCCESS",
      ExecutionStatus::Failed => "FAILED",
      ExecutionStatus::Error => "ERROR",
      ExecutionStatus::Skipped => "SKIPPED",
      ExecutionStatus::Aborted => "ABORTED",
    }
  }
}

impl fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A named value contributed by a state and visible to later states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextElement {
  pub name: String,
  pub element_type: String,
  pub value: serde_json::Value,
}

impl ContextElement {
  pub fn new(
    name: impl Into<String>,
    element_type: impl Into<String>,
    value: serde_json::Value,
  ) -> Self {
    Self {
      name: name.into(),
      element_type: element_type.into(),
      value,
    }
  }
}

/// One run of a state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
  pub execution_id: String,
  pub workflow_id: String,
  pub pipeline_execution_id: Option<String>,
  pub pipeline_stage_element_id: Option<String>,
  pub pipeline_stage_parallel_index: u32,
  pub status: ExecutionStatus,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub error_message: Option<String>,
  /// The last root-level instance, set when the execution completes.
  pub final_instance_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputScope {
  Workflow,
  Pipeline,
}

/// A named output produced by one state and readable by later states or
/// later executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepingOutput {
  pub scope: OutputScope,
  /// Workflow or pipeline execution id, depending on `scope`.
  pub scope_id: String,
  pub name: String,
  pub value: serde_json::Value,
  pub produced_by: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_classes() {
    for status in ExecutionStatus::ACTIVE {
      assert!(!status.is_final());
    }
    assert!(ExecutionStatus::Skipped.is_positive());
    assert!(ExecutionStatus::Skipped.is_final());
    assert!(ExecutionStatus::Error.is_broken());
    assert!(!ExecutionStatus::Aborted.is_broken());
    assert!(!ExecutionStatus::Aborted.is_positive());
  }

  #[test]
  fn test_severity_order() {
    assert!(ExecutionStatus::Error.severity() > ExecutionStatus::Failed.severity());
    assert!(ExecutionStatus::Failed.severity() > ExecutionStatus::Aborted.severity());
    assert!(ExecutionStatus::Aborted.severity() > ExecutionStatus::Skipped.severity());
    assert_eq!(ExecutionStatus::Success.severity(), 0);
  }
}
