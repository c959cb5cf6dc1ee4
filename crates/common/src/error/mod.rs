//! Common error types shared by the hibench crates
//!
//! Every failure in the concurrency and variable-indexing core falls into one
//! of three groups:
//!
//! 1. **Primitive failures**: a lock, thread spawn, join, detach or cancel
//!    that did not succeed. These are reported and handed back to the caller,
//!    which usually logs and continues.
//! 2. **Internal-consistency violations**: a cancellation guard underflow, a
//!    binding missing from its chart list, a thread-local record mismatch
//!    during cleanup. These are reported loudly as [`CommonError::Internal`]
//!    and the caller keeps running in degraded mode.
//! 3. **Semantic conflicts**: refused operations. Those live in the module
//!    error of the crate that owns the semantics (see `hibench-core`).
//!
//! Nothing here ever terminates the process.
//!
//! ## Module-specific errors
//!
//! Module errors compose with `CommonError` instead of duplicating it:
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum RegistryError {
//!     #[error("variable '{0}' is not custom")]
//!     NotCustom(String),
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//!
//! impl_error_classification!(RegistryError, Common,
//!     Self::NotCustom(_) => {
//!         retryable: false,
//!         severity: ErrorSeverity::Warning,
//!         critical: false,
//!     }
//! );
//! ```
//!
//! ## Severity levels
//!
//! | Level | Use Case |
//! |-------|----------|
//! | **Info** | Expected conditions (lookup misses) |
//! | **Warning** | Degraded but operational (busy locks, refused operations) |
//! | **Error** | Failure requiring attention (spawn/join failures, bad config) |
//! | **Critical** | Consistency violations that signal a usage bug |

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants that appear across multiple modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Configuration-related errors
    Config { message: String, field: Option<String> },

    /// Lock initialization, acquisition or release failed
    Lock { operation: String, resource: Option<String>, message: String },

    /// Thread creation, join, detach or cancellation failed
    Thread { tag: String, operation: String, message: String },

    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },

    /// File I/O errors
    Persistence { message: String, operation: Option<String> },

    /// Validation errors
    Validation { field: String, message: String, value: Option<String> },

    /// Resource not found errors
    NotFound { resource_type: String, identifier: Option<String> },

    /// Internal-consistency violations that shouldn't normally occur
    Internal { message: String, context: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => {
                if let Some(field) = field {
                    write!(f, "Configuration error in field '{}': {}", field, message)
                } else {
                    write!(f, "Configuration error: {}", message)
                }
            }
            Self::Lock { operation, resource, message } => {
                if let Some(resource) = resource {
                    write!(f, "Lock error during {} on '{}': {}", operation, resource, message)
                } else {
                    write!(f, "Lock error during {}: {}", operation, message)
                }
            }
            Self::Thread { tag, operation, message } => {
                write!(f, "Thread error during {} of '{}': {}", operation, tag, message)
            }
            Self::Serialization { message, format } => {
                if let Some(format) = format {
                    write!(f, "Serialization error ({}): {}", format, message)
                } else {
                    write!(f, "Serialization error: {}", message)
                }
            }
            Self::Persistence { message, operation } => {
                if let Some(op) = operation {
                    write!(f, "Persistence error during '{}': {}", op, message)
                } else {
                    write!(f, "Persistence error: {}", message)
                }
            }
            Self::Validation { field, message, value } => {
                if let Some(value) = value {
                    write!(
                        f,
                        "Validation error for field '{}' (value: '{}'): {}",
                        field, value, message
                    )
                } else {
                    write!(f, "Validation error for field '{}': {}", field, message)
                }
            }
            Self::NotFound { resource_type, identifier } => {
                if let Some(id) = identifier {
                    write!(f, "{} not found: '{}'", resource_type, id)
                } else {
                    write!(f, "{} not found", resource_type)
                }
            }
            Self::Internal { message, context } => {
                if let Some(ctx) = context {
                    write!(f, "Internal error in '{}': {}", ctx, message)
                } else {
                    write!(f, "Internal error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        // lock failures are poisoning, which persists across attempts
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } => ErrorSeverity::Error,
            Self::Lock { .. } => ErrorSeverity::Warning,
            Self::Thread { .. } => ErrorSeverity::Error,
            Self::Serialization { .. } => ErrorSeverity::Error,
            Self::Persistence { .. } => ErrorSeverity::Error,
            Self::Validation { .. } => ErrorSeverity::Error,
            Self::NotFound { .. } => ErrorSeverity::Info,
            Self::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl CommonError {
    /// Create a simple configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Create a configuration error for a specific field
    pub fn config_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Create a lock error for an operation (`lock`, `read_lock`, ...)
    pub fn lock<O: Into<String>, S: Into<String>>(operation: O, message: S) -> Self {
        Self::Lock { operation: operation.into(), resource: None, message: message.into() }
    }

    /// Create a lock error for a named resource
    pub fn lock_resource<O: Into<String>, R: Into<String>, S: Into<String>>(
        operation: O,
        resource: R,
        message: S,
    ) -> Self {
        Self::Lock {
            operation: operation.into(),
            resource: Some(resource.into()),
            message: message.into(),
        }
    }

    /// Create a thread error for a tagged thread
    pub fn thread<T: Into<String>, O: Into<String>, S: Into<String>>(
        tag: T,
        operation: O,
        message: S,
    ) -> Self {
        Self::Thread { tag: tag.into(), operation: operation.into(), message: message.into() }
    }

    /// Create a simple serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into(), format: None }
    }

    /// Create a serialization error with format information
    pub fn serialization_format<S: Into<String>, F: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Create a simple persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence { message: message.into(), operation: None }
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into(), value: None }
    }

    /// Create a validation error with the invalid value
    pub fn validation_with_value<F: Into<String>, M: Into<String>, V: Into<String>>(
        field: F,
        message: M,
        value: V,
    ) -> Self {
        Self::Validation { field: field.into(), message: message.into(), value: Some(value.into()) }
    }

    /// Create a not found error
    pub fn not_found<T: Into<String>>(resource_type: T) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: None }
    }

    /// Create a not found error with identifier
    pub fn not_found_with_id<T: Into<String>, I: Into<String>>(
        resource_type: T,
        identifier: I,
    ) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: Some(identifier.into()) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), context: None }
    }

    /// Create an internal error with context
    pub fn internal_with_context<S: Into<String>, C: Into<String>>(message: S, context: C) -> Self {
        Self::Internal { message: message.into(), context: Some(context.into()) }
    }

    /// Short machine-friendly name of the variant, for structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Lock { .. } => "lock",
            Self::Thread { .. } => "thread",
            Self::Serialization { .. } => "serialization",
            Self::Persistence { .. } => "persistence",
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Standard classification interface for all error types in the system
///
/// Lets callers decide uniformly whether to retry (busy locks), how loudly to
/// report (consistency violations are critical), and what to surface.
pub trait ErrorClassification {
    /// Check if this error is retryable
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

// Standard conversions from common error types
impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}

/// Macro to implement ErrorClassification by delegating to CommonError
///
/// ```rust,ignore
/// impl_error_classification!(MyError, Common,
///     Self::Specific(_) => {
///         retryable: false,
///         severity: ErrorSeverity::Error,
///         critical: false,
///     }
/// );
/// ```
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::is_retryable(e),
                    $(
                        $variant => $retryable,
                    )*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::severity(e),
                    $(
                        $variant => $severity,
                    )*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::is_critical(e),
                    $(
                        $variant => $critical,
                    )*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::retry_after(e),
                    $(
                        $(
                            $variant => $retry_after,
                        )?
                    )*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}
