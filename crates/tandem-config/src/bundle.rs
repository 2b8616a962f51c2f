use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::PipelineDef;
use crate::workflow::WorkflowDef;

/// A set of workflow and pipeline definitions loaded together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Definitions {
  #[serde(default)]
  pub workflows: Vec<WorkflowDef>,
  #[serde(default)]
  pub pipelines: Vec<PipelineDef>,
}

impl Definitions {
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(content)?)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_json(&content)
  }

  pub fn workflow(&self, workflow_id: &str) -> Option<&WorkflowDef> {
    self.workflows.iter().find(|w| w.workflow_id == workflow_id)
  }

  pub fn pipeline(&self, pipeline_id: &str) -> Option<&PipelineDef> {
    self.pipelines.iter().find(|p| p.pipeline_id == pipeline_id)
  }
}
