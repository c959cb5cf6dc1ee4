//! Configuration management

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_LOG_FILTER, DEFAULT_MAX_VARIABLE_LENGTH, MIN_VARIABLE_LENGTH};
use crate::errors::{HibenchError, Result};
use crate::impl_domain_enum_conversions;

/// Agent configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub threads: ThreadConfig,
    pub registry: RegistryConfig,
    pub logging: LogConfig,
}

/// Worker thread configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Requested stack size; only ever widens the platform default
    pub stack_size_bytes: Option<usize>,
}

/// Which record a lookup returns when several share a name in one table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateLookup {
    /// The most recently registered record wins
    #[default]
    MostRecent,
    /// The first registered record wins
    FirstRegistered,
}

impl_domain_enum_conversions!(DuplicateLookup {
    MostRecent => "most_recent",
    FirstRegistered => "first_registered",
});

/// Variable registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub duplicate_lookup: DuplicateLookup,
    /// Longest composite key (`<chart>.<variable>`), in bytes
    pub max_variable_length: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            duplicate_lookup: DuplicateLookup::default(),
            max_variable_length: DEFAULT_MAX_VARIABLE_LENGTH,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set
    pub filter: String,
    pub json: bool,
    /// Emit lock call-site traces regardless of `filter`
    pub lock_tracing: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: DEFAULT_LOG_FILTER.to_string(), json: false, lock_tracing: false }
    }
}

impl Config {
    /// Reject values no component can work with
    ///
    /// # Errors
    /// Returns `HibenchError::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.threads.stack_size_bytes == Some(0) {
            return Err(HibenchError::Config("threads.stack_size_bytes must be positive".to_string()));
        }
        if self.registry.max_variable_length < MIN_VARIABLE_LENGTH {
            return Err(HibenchError::Config(format!(
                "registry.max_variable_length must be at least {MIN_VARIABLE_LENGTH}, got {}",
                self.registry.max_variable_length
            )));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(HibenchError::Config("logging.filter must not be empty".to_string()));
        }
        Ok(())
    }
}
