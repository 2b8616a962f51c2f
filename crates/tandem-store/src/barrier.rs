use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Composite identity of a barrier record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BarrierKey {
  pub identifier: String,
  pub pipeline_execution_id: String,
  pub parallel_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
  Standing,
  /// Every participant reached the barrier.
  Down,
  /// A participant failed before all reached it.
  Endure,
}

impl BarrierState {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, BarrierState::Standing)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
  Pending,
  Reached,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierParticipant {
  pub pipeline_stage_element_id: String,
  /// Filled in when the participant first touches the barrier.
  pub workflow_execution_id: Option<String>,
  pub status: ParticipantStatus,
}

/// Shared rendezvous record for the workflows of one parallel group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierInstance {
  /// Correlation id waited on by standing participants.
  pub id: String,
  pub key: BarrierKey,
  pub state: BarrierState,
  pub participants: Vec<BarrierParticipant>,
  /// Bumped by the store on every successful compare-and-set.
  pub version: u64,
  pub created_at: DateTime<Utc>,
}

impl BarrierInstance {
  pub fn new(key: BarrierKey, participant_element_ids: &[String]) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      key,
      state: BarrierState::Standing,
      participants: participant_element_ids
        .iter()
        .map(|element_id| BarrierParticipant {
          pipeline_stage_element_id: element_id.clone(),
          workflow_execution_id: None,
          status: ParticipantStatus::Pending,
        })
        .collect(),
      version: 0,
      created_at: Utc::now(),
    }
  }

  pub fn participant(&self, element_id: &str) -> Option<&BarrierParticipant> {
    self
      .participants
      .iter()
      .find(|p| p.pipeline_stage_element_id == element_id)
  }

  pub fn participant_mut(&mut self, element_id: &str) -> Option<&mut BarrierParticipant> {
    self
      .participants
      .iter_mut()
      .find(|p| p.pipeline_stage_element_id == element_id)
  }
}

/// One barrier expected at a given parallel index of a pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedBarrier {
  pub identifier: String,
  pub parallel_index: u32,
  /// Stage element ids of the workflows expected to reach the barrier.
  pub participants: Vec<String>,
}

/// The barriers of one pipeline execution, registered when it starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarrierPlan {
  pub pipeline_execution_id: String,
  pub barriers: Vec<PlannedBarrier>,
}

impl BarrierPlan {
  pub fn find(&self, identifier: &str, parallel_index: u32) -> Option<&PlannedBarrier> {
    self
      .barriers
      .iter()
      .find(|b| b.identifier == identifier && b.parallel_index == parallel_index)
  }
}
