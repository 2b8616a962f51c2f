use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long an instance may stay WAITING before the coordinator expires it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
  /// Use the engine default for the state kind.
  #[default]
  Default,
  FixedMs(u64),
  Infinite,
}

impl TimeoutPolicy {
  pub fn is_default(&self) -> bool {
    matches!(self, TimeoutPolicy::Default)
  }

  /// Resolve to a concrete duration, `None` meaning "never expire".
  pub fn resolve(&self, default: Duration) -> Option<Duration> {
    match self {
      TimeoutPolicy::Default => Some(default),
      TimeoutPolicy::FixedMs(ms) => Some(Duration::from_millis(*ms)),
      TimeoutPolicy::Infinite => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve() {
    let default = Duration::from_secs(60);
    assert_eq!(TimeoutPolicy::Default.resolve(default), Some(default));
    assert_eq!(
      TimeoutPolicy::FixedMs(1500).resolve(default),
      Some(Duration::from_millis(1500))
    );
    assert_eq!(TimeoutPolicy::Infinite.resolve(default), None);
  }

  #[test]
  fn test_serde_shape() {
    assert_eq!(
      serde_json::to_value(TimeoutPolicy::FixedMs(10)).unwrap(),
      serde_json::json!({ "fixed_ms": 10 })
    );
    assert_eq!(
      serde_json::from_value::<TimeoutPolicy>(serde_json::json!("infinite")).unwrap(),
      TimeoutPolicy::Infinite
    );
  }
}
