use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A pipeline: workflows run stage by stage.
///
/// A stage marked `parallel_with_previous` shares the parallel index of the
/// stage before it, and all stages sharing an index run concurrently. Barriers
/// synchronize workflows within one parallel group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
  pub pipeline_id: String,
  pub name: String,
  pub stages: Vec<PipelineStageDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStageDef {
  /// Stable id of this stage element within the pipeline.
  pub element_id: String,
  pub name: String,
  pub workflow_id: String,
  #[serde(default)]
  pub parallel_with_previous: bool,
  #[serde(default)]
  pub variables: HashMap<String, serde_json::Value>,
}

impl PipelineDef {
  /// Group stages by parallel index, in execution order.
  pub fn parallel_groups(&self) -> Vec<(u32, Vec<&PipelineStageDef>)> {
    let mut groups: Vec<(u32, Vec<&PipelineStageDef>)> = Vec::new();

    for stage in &self.stages {
      match groups.last_mut() {
        Some((_, members)) if stage.parallel_with_previous => members.push(stage),
        _ => {
          let index = groups.len() as u32;
          groups.push((index, vec![stage]));
        }
      }
    }

    groups
  }

  pub fn stage(&self, element_id: &str) -> Option<&PipelineStageDef> {
    self.stages.iter().find(|s| s.element_id == element_id)
  }
}
