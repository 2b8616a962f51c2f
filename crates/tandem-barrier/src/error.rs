use tandem_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BarrierError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("barrier '{identifier}' still contended after {attempts} attempts")]
  Contended { identifier: String, attempts: usize },
}
