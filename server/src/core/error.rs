// tileworld_server/server/src/core/error.rs
use thiserror::Error;

use crate::core::types::HighGuid;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("GUID space exhausted for {0:?}")]
    GuidSpaceExhausted(HighGuid),

    #[error("Duplicate GUID {0:#018x}")]
    DuplicateGuid(u64),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
