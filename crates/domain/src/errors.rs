//! Error types used at the configuration and bootstrap boundary

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for hibench configuration and startup
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum HibenchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias for hibench configuration operations
pub type Result<T> = std::result::Result<T, HibenchError>;
