//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured filter. Lock call-site
//! traces live on their own target and are only switched on by
//! [`LogConfig::lock_tracing`] or an explicit directive, so the lock
//! wrappers skip their timing work everywhere else.

use hibench_domain::constants::LOCK_TRACE_DIRECTIVE;
use hibench_domain::{HibenchError, LogConfig, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the filter `init` installs
///
/// # Errors
/// Returns `HibenchError::Logging` when the configured directives do not
/// parse.
pub fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| HibenchError::Logging(format!("Invalid log filter '{}': {e}", config.filter)))?,
    };

    if !config.lock_tracing {
        return Ok(filter);
    }
    let directive = LOCK_TRACE_DIRECTIVE
        .parse()
        .map_err(|e| HibenchError::Logging(format!("Invalid lock trace directive: {e}")))?;
    Ok(filter.add_directive(directive))
}

/// Install the global subscriber
///
/// Only the first call in a process installs anything.
///
/// # Errors
/// Returns `HibenchError::Logging` when the filter is invalid or a global
/// subscriber is already set.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr).with_thread_names(true)).try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true).with_thread_names(true))
            .try_init()
    };
    installed.map_err(|e| HibenchError::Logging(format!("Tracing subscriber already installed: {e}")))?;

    tracing::info!(
        filter = %config.filter,
        json = config.json,
        lock_tracing = config.lock_tracing,
        "tracing initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_tracing_adds_directive() {
        let config = LogConfig { filter: "warn".to_string(), json: false, lock_tracing: true };
        let filter = build_filter(&config).unwrap();
        assert!(filter.to_string().contains("hibench::locks=trace"));
    }

    #[test]
    fn test_invalid_filter_is_a_logging_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig { filter: "hibench=notalevel".to_string(), json: false, lock_tracing: false };
        assert!(matches!(build_filter(&config), Err(HibenchError::Logging(_))));
    }
}
