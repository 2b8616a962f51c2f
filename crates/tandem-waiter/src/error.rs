use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaitError {
  #[error("instance {0} registered a wait without correlation ids")]
  NoCorrelationIds(String),

  #[error("instance {0} is already waiting")]
  AlreadyWaiting(String),
}
