use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read definitions from {path}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid definition JSON: {0}")]
  Parse(#[from] serde_json::Error),
}
