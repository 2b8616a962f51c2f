use std::collections::HashMap;

use tandem_config::{StateDef, StateKind, StateType, TransitionDef, TransitionType};

use crate::error::WorkflowError;

/// One validated state graph (the root graph or a nested sub-workflow).
#[derive(Debug, Clone)]
pub struct StateGraph {
  /// `None` for the root graph, the sub-workflow id otherwise.
  graph_id: Option<String>,
  initial_state: String,
  /// States in declaration order.
  order: Vec<String>,
  states: HashMap<String, StateDef>,
  /// state -> next state on a positive outcome.
  success: HashMap<String, String>,
  /// state -> next state on a broken outcome.
  failure: HashMap<String, String>,
}

impl StateGraph {
  /// Build and validate a graph from its states and transitions.
  pub fn new(
    graph_id: Option<String>,
    initial_state: &str,
    states: &[StateDef],
    transitions: &[TransitionDef],
  ) -> Result<Self, WorkflowError> {
    let label = graph_id.clone().unwrap_or_else(|| "root".to_string());
    let mut by_name = HashMap::with_capacity(states.len());
    let mut order = Vec::with_capacity(states.len());

    for state in states {
      if by_name.insert(state.name.clone(), state.clone()).is_some() {
        return Err(WorkflowError::DuplicateState {
          graph: label,
          state: state.name.clone(),
        });
      }
      order.push(state.name.clone());
    }

    if !by_name.contains_key(initial_state) {
      return Err(WorkflowError::StateNotFound(initial_state.to_string()));
    }

    let mut success = HashMap::new();
    let mut failure = HashMap::new();

    for t in transitions {
      if !by_name.contains_key(&t.from) || !by_name.contains_key(&t.to) {
        return Err(WorkflowError::InvalidTransition {
          from: t.from.clone(),
          to: t.to.clone(),
        });
      }

      let (index, outcome) = match t.on {
        TransitionType::Success => (&mut success, "success"),
        TransitionType::Failure => (&mut failure, "failure"),
      };
      if index.insert(t.from.clone(), t.to.clone()).is_some() {
        return Err(WorkflowError::AmbiguousTransition(t.from.clone(), outcome));
      }
    }

    let graph = Self {
      graph_id,
      initial_state: initial_state.to_string(),
      order,
      states: by_name,
      success,
      failure,
    };
    graph.validate_references()?;
    Ok(graph)
  }

  /// Check that fork children and loop-resume targets live in this graph.
  fn validate_references(&self) -> Result<(), WorkflowError> {
    for name in &self.order {
      match &self.states[name].state_type {
        StateType::Fork { children } => {
          if children.is_empty() {
            return Err(WorkflowError::EmptyFork(name.clone()));
          }
          for child in children {
            if !self.states.contains_key(child) {
              return Err(WorkflowError::UnknownForkChild {
                fork: name.clone(),
                child: child.clone(),
              });
            }
          }
        }
        StateType::EnvLoopResume { resume_state, .. } => {
          let target_kind = self.states.get(resume_state).map(|s| s.kind());
          if target_kind != Some(StateKind::EnvResume) {
            return Err(WorkflowError::InvalidResumeTarget {
              state: name.clone(),
              target: resume_state.clone(),
            });
          }
        }
        _ => {}
      }
    }
    Ok(())
  }

  pub fn graph_id(&self) -> Option<&str> {
    self.graph_id.as_deref()
  }

  pub fn initial_state(&self) -> &str {
    &self.initial_state
  }

  pub fn state(&self, name: &str) -> Option<&StateDef> {
    self.states.get(name)
  }

  /// All states in declaration order.
  pub fn states(&self) -> impl Iterator<Item = &StateDef> {
    self.order.iter().map(|name| &self.states[name])
  }

  /// The state to run after `name` finishes with a positive status.
  pub fn success_transition(&self, name: &str) -> Option<&StateDef> {
    self.success.get(name).and_then(|next| self.states.get(next))
  }

  /// The state to run after `name` finishes with a broken status.
  pub fn failure_transition(&self, name: &str) -> Option<&StateDef> {
    self.failure.get(name).and_then(|next| self.states.get(next))
  }
}
