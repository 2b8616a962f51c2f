use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_state::TimeoutDefaults;

use crate::error::EngineError;

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Timeout for states whose policy is `default`.
  pub default_state_timeout_ms: u64,
  /// Timeout for resume states whose policy is `default`.
  pub resume_state_timeout_ms: u64,
  /// How long posted responses nobody waits on are kept.
  pub response_retention_ms: u64,
  pub sweep_interval_ms: u64,
  pub app_id: String,
  pub account_id: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      default_state_timeout_ms: 4 * 60 * 60 * 1000,
      resume_state_timeout_ms: 24 * 60 * 60 * 1000,
      response_retention_ms: 60 * 60 * 1000,
      sweep_interval_ms: 60 * 1000,
      app_id: "default".to_string(),
      account_id: "default".to_string(),
    }
  }
}

impl EngineConfig {
  /// Load from a JSON file. Missing fields take their defaults.
  pub fn from_file(path: &Path) -> Result<Self, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigRead {
      path: path.display().to_string(),
      source: e,
    })?;
    Ok(serde_json::from_str(&content)?)
  }

  pub fn timeouts(&self) -> TimeoutDefaults {
    TimeoutDefaults {
      default_state: Duration::from_millis(self.default_state_timeout_ms),
      resume_state: Duration::from_millis(self.resume_state_timeout_ms),
    }
  }

  pub fn response_retention(&self) -> Duration {
    Duration::from_millis(self.response_retention_ms)
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_millis(self.sweep_interval_ms)
  }
}
