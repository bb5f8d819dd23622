use crate::driver::DriverError;
use crate::hooks::HookEvent;
use crate::validation::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MongoliteError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unknown filter operator in key '{key}'")]
    UnknownOperator { key: String },

    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DriverError),

    #[error("Hook '{event}' failed: {message}")]
    Hook { event: HookEvent, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Collection '{0}' is not registered")]
    UnknownCollection(String),

    #[error("Unknown hook event: {0}")]
    UnknownHookEvent(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MongoliteError {
    /// Programming errors in the caller's filter or update document.
    pub fn is_filter_error(&self) -> bool {
        matches!(
            self,
            MongoliteError::UnknownOperator { .. } | MongoliteError::MalformedFilter(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MongoliteError>;
