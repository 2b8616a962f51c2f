//! Demonstration step kinds, runnable without external integrations.

mod fail;
mod log;

pub use fail::{FailStep, FailStepFactory};
pub use log::{LogStep, LogStepFactory};

use serde_json::{Map, Value};

use crate::error::StateError;

pub(crate) fn string_param(
  state: &str,
  params: &Map<String, Value>,
  key: &str,
) -> Result<Option<String>, StateError> {
  match params.get(key) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) => Ok(Some(s.clone())),
    Some(other) => Err(StateError::InvalidParams {
      state: state.to_string(),
      message: format!("'{key}' must be a string, got {other}"),
    }),
  }
}
