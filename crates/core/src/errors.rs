//! Error types for the registry and chart-variable bindings

use hibench_common::error::{CommonError, ErrorSeverity};
use hibench_common::impl_error_classification;
use thiserror::Error;

/// Result type for registry and binding operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Refused registry operations and the primitive failures underneath them
#[derive(Debug, Error)]
pub enum CoreError {
    /// A custom variable would shadow a collector-owned one
    #[error("custom variable '{name}' on chart '{chart}' of host '{host}' conflicts with an internal chart variable")]
    NameConflict { name: String, chart: String, host: String },

    /// Only custom variables can be set from outside
    #[error("variable '{name}' of chart '{chart}' on host '{host}' is not a custom one")]
    NotCustom { name: String, chart: String, host: String },

    /// The binding is not (or no longer) in its chart's list
    #[error("chart variable '{name}' not found in chart '{chart}' variables list")]
    BindingNotFound { name: String, chart: String },

    /// The chart the binding belonged to has been dropped
    #[error("chart of variable '{0}' has been released")]
    ChartReleased(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_classification!(CoreError, Common,
    Self::NameConflict { .. } => {
        retryable: false,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::NotCustom { .. } => {
        retryable: false,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::BindingNotFound { .. } => {
        retryable: false,
        severity: ErrorSeverity::Critical,
        critical: true,
    },
    Self::ChartReleased(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    }
);
