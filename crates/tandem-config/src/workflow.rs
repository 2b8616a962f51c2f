use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state::StateDef;

/// A workflow definition: a root state graph plus any nested graphs it
/// delegates to through `sub_workflow` states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  pub initial_state: String,
  pub states: Vec<StateDef>,
  #[serde(default)]
  pub transitions: Vec<TransitionDef>,
  #[serde(default)]
  pub sub_workflows: Vec<SubWorkflowDef>,
  /// Default workflow variables, overridable per execution.
  #[serde(default)]
  pub variables: HashMap<String, serde_json::Value>,
}

/// A nested state graph, addressed by `sub_workflow_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubWorkflowDef {
  pub sub_workflow_id: String,
  pub initial_state: String,
  pub states: Vec<StateDef>,
  #[serde(default)]
  pub transitions: Vec<TransitionDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDef {
  pub from: String,
  pub to: String,
  #[serde(default)]
  pub on: TransitionType,
}

impl TransitionDef {
  pub fn on_success(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      on: TransitionType::Success,
    }
  }

  pub fn on_failure(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      on: TransitionType::Failure,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
  #[default]
  Success,
  Failure,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_transition_defaults_to_success() {
    let t: TransitionDef = serde_json::from_value(json!({ "from": "a", "to": "b" })).unwrap();
    assert_eq!(t, TransitionDef::on_success("a", "b"));
  }

  #[test]
  fn test_workflow_with_sub_workflow() {
    let def: WorkflowDef = serde_json::from_value(json!({
      "workflow_id": "wf",
      "name": "Workflow",
      "initial_state": "phase",
      "states": [
        { "name": "phase", "type": "sub_workflow", "sub_workflow_id": "phase-1" }
      ],
      "sub_workflows": [
        {
          "sub_workflow_id": "phase-1",
          "initial_state": "step",
          "states": [{ "name": "step", "type": "wait", "duration_secs": 1 }]
        }
      ]
    }))
    .unwrap();

    assert_eq!(def.sub_workflows.len(), 1);
    assert!(def.transitions.is_empty());
    assert!(def.variables.is_empty());
  }
}
