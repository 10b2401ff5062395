use form_spec::SpecError;
use thiserror::Error;

use crate::config::ConfigError;

/// Boxed error returned by user-supplied submit handlers and async validators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid form spec: {0}")]
    Spec(#[from] SpecError),
    #[error("{kind} registered for unknown field '{field}'")]
    UnknownField { kind: &'static str, field: String },
    #[error("page {0} is not declared by any field")]
    UnknownPage(u32),
    #[error("tab '{0}' is not declared")]
    UnknownTab(String),
    #[error("engine config: {0}")]
    Config(#[from] ConfigError),
}

/// Failures of the durable key-value store. Never escape the engine.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the caller's submit handler, returned to the caller unchanged.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submit handler failed: {0}")]
    Handler(#[source] BoxError),
}
