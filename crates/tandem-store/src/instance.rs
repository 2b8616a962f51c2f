use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_config::{StateDef, StateKind};
use uuid::Uuid;

use crate::types::{ContextElement, ExecutionStatus};

/// Where an instance sits: which app, workflow run and pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionIdentity {
  pub app_id: String,
  pub account_id: String,
  pub workflow_id: String,
  pub workflow_execution_id: String,
  pub pipeline_execution_id: Option<String>,
  pub pipeline_stage_element_id: Option<String>,
  pub pipeline_stage_parallel_index: u32,
}

/// Runtime record of one execution of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateExecutionInstance {
  pub id: String,
  pub state_name: String,
  pub state_kind: StateKind,
  /// Nested graph the state lives in, `None` for the root graph.
  pub child_state_machine_id: Option<String>,
  pub status: ExecutionStatus,
  pub parent_instance_id: Option<String>,
  pub prev_instance_id: Option<String>,
  /// Correlation id posted when this instance's chain ends.
  pub notify_id: Option<String>,
  pub context_elements: Vec<ContextElement>,
  pub notify_elements: Vec<ContextElement>,
  pub state_params: HashMap<String, serde_json::Value>,
  pub variables: HashMap<String, serde_json::Value>,
  pub identity: ExecutionIdentity,
  pub created_at: DateTime<Utc>,
  pub start_ts: Option<DateTime<Utc>>,
  pub end_ts: Option<DateTime<Utc>>,
  pub expiry_ts: Option<DateTime<Utc>>,
  pub error_message: Option<String>,
  /// Opaque per-kind payload written by the state.
  pub execution_data: Option<serde_json::Value>,
}

/// Overrides applied when spawning a child instance.
#[derive(Debug, Clone)]
pub struct ChildSpec {
  pub state_name: String,
  pub state_kind: StateKind,
  pub child_state_machine_id: Option<String>,
  pub notify_id: String,
  pub state_params: HashMap<String, serde_json::Value>,
}

impl ChildSpec {
  pub fn new(
    state_name: impl Into<String>,
    state_kind: StateKind,
    notify_id: impl Into<String>,
  ) -> Self {
    Self {
      state_name: state_name.into(),
      state_kind,
      child_state_machine_id: None,
      notify_id: notify_id.into(),
      state_params: HashMap::new(),
    }
  }

  pub fn in_graph(mut self, child_state_machine_id: Option<String>) -> Self {
    self.child_state_machine_id = child_state_machine_id;
    self
  }

  pub fn with_params(mut self, state_params: HashMap<String, serde_json::Value>) -> Self {
    self.state_params = state_params;
    self
  }
}

impl StateExecutionInstance {
  /// A fresh root-level instance for the first state of a workflow execution.
  pub fn root(state: &StateDef, identity: ExecutionIdentity) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      state_name: state.name.clone(),
      state_kind: state.kind(),
      child_state_machine_id: None,
      status: ExecutionStatus::New,
      parent_instance_id: None,
      prev_instance_id: None,
      notify_id: None,
      context_elements: Vec::new(),
      notify_elements: Vec::new(),
      state_params: HashMap::new(),
      variables: HashMap::new(),
      identity,
      created_at: Utc::now(),
      start_ts: None,
      end_ts: None,
      expiry_ts: None,
      error_message: None,
      execution_data: None,
    }
  }

  pub fn with_variables(mut self, variables: HashMap<String, serde_json::Value>) -> Self {
    self.variables = variables;
    self
  }

  /// Copy of this instance with everything run-specific reset.
  fn fresh_copy(&self) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      status: ExecutionStatus::New,
      created_at: Utc::now(),
      start_ts: None,
      end_ts: None,
      expiry_ts: None,
      error_message: None,
      execution_data: None,
      notify_elements: Vec::new(),
      state_params: HashMap::new(),
      ..self.clone()
    }
  }

  /// A child instance parented to this one.
  pub fn spawn_child(&self, spec: ChildSpec) -> Self {
    Self {
      state_name: spec.state_name,
      state_kind: spec.state_kind,
      child_state_machine_id: spec.child_state_machine_id,
      parent_instance_id: Some(self.id.clone()),
      prev_instance_id: None,
      notify_id: Some(spec.notify_id),
      state_params: spec.state_params,
      ..self.fresh_copy()
    }
  }

  /// The instance for the state transitioned to after this one. Keeps the
  /// parent, graph and notify id so the chain ends where it started.
  pub fn next(&self, state: &StateDef) -> Self {
    Self {
      state_name: state.name.clone(),
      state_kind: state.kind(),
      prev_instance_id: Some(self.id.clone()),
      ..self.fresh_copy()
    }
  }

  pub fn context_element(&self, name: &str) -> Option<&ContextElement> {
    self.context_elements.iter().rev().find(|e| e.name == name)
  }

  /// Append elements, replacing any earlier element with the same name.
  pub fn merge_context_elements(&mut self, elements: &[ContextElement]) {
    for element in elements {
      self.context_elements.retain(|e| e.name != element.name);
      self.context_elements.push(element.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tandem_config::StateType;

  fn identity() -> ExecutionIdentity {
    ExecutionIdentity {
      app_id: "app".to_string(),
      account_id: "acct".to_string(),
      workflow_id: "wf".to_string(),
      workflow_execution_id: "exec-1".to_string(),
      ..Default::default()
    }
  }

  fn fork() -> StateDef {
    StateDef::new(
      "fork",
      StateType::Fork {
        children: vec!["a".to_string()],
      },
    )
  }

  #[test]
  fn test_spawn_child_resets_run_fields() {
    let mut parent = StateExecutionInstance::root(&fork(), identity());
    parent.status = ExecutionStatus::Running;
    parent.start_ts = Some(Utc::now());
    parent.execution_data = Some(json!({"x": 1}));
    parent.context_elements.push(ContextElement::new("build", "artifact", json!("v1")));

    let child = parent.spawn_child(ChildSpec::new("a", StateKind::Step, "notify-a"));

    assert_ne!(child.id, parent.id);
    assert_eq!(child.status, ExecutionStatus::New);
    assert_eq!(child.parent_instance_id.as_deref(), Some(parent.id.as_str()));
    assert_eq!(child.notify_id.as_deref(), Some("notify-a"));
    assert!(child.start_ts.is_none());
    assert!(child.execution_data.is_none());
    assert_eq!(child.context_elements.len(), 1);
    assert_eq!(child.identity, parent.identity);
  }

  #[test]
  fn test_next_keeps_notify_and_parent() {
    let parent = StateExecutionInstance::root(&fork(), identity());
    let mut child = parent.spawn_child(
      ChildSpec::new("inner", StateKind::Wait, parent.id.clone())
        .in_graph(Some("phase".to_string())),
    );
    child.status = ExecutionStatus::Success;
    child.notify_elements.push(ContextElement::new("x", "value", json!(1)));

    let next = child.next(&StateDef::new("after", StateType::Wait { duration_secs: 1 }));

    assert_eq!(next.notify_id, child.notify_id);
    assert_eq!(next.parent_instance_id, child.parent_instance_id);
    assert_eq!(next.prev_instance_id.as_deref(), Some(child.id.as_str()));
    assert_eq!(next.child_state_machine_id.as_deref(), Some("phase"));
    assert_eq!(next.status, ExecutionStatus::New);
    assert!(next.notify_elements.is_empty());
  }

  #[test]
  fn test_merge_context_elements_replaces_by_name() {
    let mut instance = StateExecutionInstance::root(&fork(), identity());
    instance.merge_context_elements(&[
      ContextElement::new("a", "value", json!(1)),
      ContextElement::new("b", "value", json!(2)),
    ]);
    instance.merge_context_elements(&[ContextElement::new("a", "value", json!(3))]);

    assert_eq!(instance.context_elements.len(), 2);
    assert_eq!(instance.context_element("a").unwrap().value, json!(3));
  }
}
