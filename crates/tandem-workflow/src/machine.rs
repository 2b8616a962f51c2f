use std::collections::HashMap;

use tandem_config::{StateDef, WorkflowDef};

use crate::error::WorkflowError;
use crate::graph::StateGraph;

/// A locked state machine ready for execution.
#[derive(Debug, Clone)]
pub struct StateMachine {
  pub workflow_id: String,
  pub name: String,
  pub variables: HashMap<String, serde_json::Value>,
  root: StateGraph,
  children: HashMap<String, StateGraph>,
}

impl StateMachine {
  /// Validate a workflow definition and lock it.
  pub fn lock(def: WorkflowDef) -> Result<Self, WorkflowError> {
    let root = StateGraph::new(None, &def.initial_state, &def.states, &def.transitions)?;

    let mut children = HashMap::with_capacity(def.sub_workflows.len());
    for sub in &def.sub_workflows {
      let graph = StateGraph::new(
        Some(sub.sub_workflow_id.clone()),
        &sub.initial_state,
        &sub.states,
        &sub.transitions,
      )?;
      if children.insert(sub.sub_workflow_id.clone(), graph).is_some() {
        return Err(WorkflowError::DuplicateSubWorkflow(
          sub.sub_workflow_id.clone(),
        ));
      }
    }

    Ok(Self {
      workflow_id: def.workflow_id,
      name: def.name,
      variables: def.variables,
      root,
      children,
    })
  }

  /// A machine with exactly one state and no transitions.
  pub fn single_state(
    workflow_id: impl Into<String>,
    name: impl Into<String>,
    state: StateDef,
  ) -> Result<Self, WorkflowError> {
    let initial = state.name.clone();
    Self::lock(WorkflowDef {
      workflow_id: workflow_id.into(),
      name: name.into(),
      initial_state: initial,
      states: vec![state],
      transitions: vec![],
      sub_workflows: vec![],
      variables: HashMap::new(),
    })
  }

  pub fn root(&self) -> &StateGraph {
    &self.root
  }

  /// Look up a graph: `None` is the root graph, `Some(id)` a sub-workflow.
  pub fn graph(&self, child_machine_id: Option<&str>) -> Option<&StateGraph> {
    match child_machine_id {
      None => Some(&self.root),
      Some(id) => self.children.get(id),
    }
  }

  pub fn graphs(&self) -> impl Iterator<Item = &StateGraph> {
    std::iter::once(&self.root).chain(self.children.values())
  }

  pub fn state(&self, child_machine_id: Option<&str>, name: &str) -> Option<&StateDef> {
    self.graph(child_machine_id).and_then(|g| g.state(name))
  }

  pub fn success_transition(
    &self,
    child_machine_id: Option<&str>,
    name: &str,
  ) -> Option<&StateDef> {
    self
      .graph(child_machine_id)
      .and_then(|g| g.success_transition(name))
  }

  pub fn failure_transition(
    &self,
    child_machine_id: Option<&str>,
    name: &str,
  ) -> Option<&StateDef> {
    self
      .graph(child_machine_id)
      .and_then(|g| g.failure_transition(name))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tandem_config::{StateKind, StateType, SubWorkflowDef, TransitionDef};

  fn wait(name: &str) -> StateDef {
    StateDef::new(name, StateType::Wait { duration_secs: 1 })
  }

  fn workflow() -> WorkflowDef {
    WorkflowDef {
      workflow_id: "wf".to_string(),
      name: "Workflow".to_string(),
      initial_state: "phase".to_string(),
      states: vec![
        StateDef::new(
          "phase",
          StateType::SubWorkflow {
            sub_workflow_id: "phase-1".to_string(),
          },
        ),
        wait("after"),
      ],
      transitions: vec![TransitionDef::on_success("phase", "after")],
      sub_workflows: vec![SubWorkflowDef {
        sub_workflow_id: "phase-1".to_string(),
        initial_state: "inner".to_string(),
        states: vec![wait("inner")],
        transitions: vec![],
      }],
      variables: HashMap::new(),
    }
  }

  #[test]
  fn test_lock_indexes_sub_workflows() {
    let sm = StateMachine::lock(workflow()).unwrap();

    assert_eq!(sm.root().initial_state(), "phase");
    assert_eq!(sm.graph(Some("phase-1")).unwrap().initial_state(), "inner");
    assert!(sm.graph(Some("missing")).is_none());
    assert_eq!(sm.state(Some("phase-1"), "inner").unwrap().kind(), StateKind::Wait);
    assert!(sm.state(None, "inner").is_none());
    assert_eq!(sm.success_transition(None, "phase").unwrap().name, "after");
    assert_eq!(sm.graphs().count(), 2);
  }

  #[test]
  fn test_duplicate_sub_workflow_rejected() {
    let mut def = workflow();
    def.sub_workflows.push(def.sub_workflows[0].clone());
    let err = StateMachine::lock(def).unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateSubWorkflow(id) if id == "phase-1"));
  }

  #[test]
  fn test_single_state() {
    let sm = StateMachine::single_state("wf::resume", "Resume", wait("only")).unwrap();
    assert_eq!(sm.root().initial_state(), "only");
    assert!(sm.success_transition(None, "only").is_none());
  }

  #[test]
  fn test_missing_initial_state() {
    let mut def = workflow();
    def.initial_state = "nope".to_string();
    let err = StateMachine::lock(def).unwrap_err();
    assert!(matches!(err, WorkflowError::StateNotFound(s) if s == "nope"));
  }
}
