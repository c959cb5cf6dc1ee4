//! Startup sequence
//!
//! Runs once before any managed thread or host is created: logging, thread
//! defaults, then the registry options hosts are built with.

use hibench_common::thread;
use hibench_core::RegistryOptions;
use hibench_domain::{Config, HibenchError, Result};

/// What [`bootstrap`] set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bootstrapped {
    /// Options for every [`hibench_core::Host`] of this process
    pub registry: RegistryOptions,
    /// Stack size managed threads get from now on
    pub stack_size: usize,
    /// Whether this call installed the global subscriber
    pub logging_installed: bool,
}

/// Validate `config` and apply it to the process
///
/// A subscriber installed earlier (by a test harness or an embedding
/// application) is kept.
///
/// # Errors
/// Returns `HibenchError::Config` for an invalid configuration and
/// `HibenchError::Logging` for an unparsable log filter.
pub fn bootstrap(config: &Config) -> Result<Bootstrapped> {
    config.validate()?;

    let logging_installed = match crate::logging::init(&config.logging) {
        Ok(()) => true,
        Err(HibenchError::Logging(reason)) if crate::logging::build_filter(&config.logging).is_ok() => {
            tracing::debug!(%reason, "keeping the existing tracing subscriber");
            false
        }
        Err(err) => return Err(err),
    };

    let default_stack_size = thread::init();
    let stack_size = match config.threads.stack_size_bytes {
        Some(requested) => thread::configure_stack_size(requested),
        None => thread::stack_size(),
    };

    let registry = RegistryOptions::from(&config.registry);
    tracing::info!(
        default_stack_size,
        stack_size,
        duplicate_lookup = %registry.duplicate_lookup,
        max_variable_length = registry.max_variable_length,
        "hibench bootstrapped"
    );

    Ok(Bootstrapped { registry, stack_size, logging_installed })
}
