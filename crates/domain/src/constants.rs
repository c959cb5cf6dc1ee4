//! Application constants
//!
//! Centralized location for the domain-level defaults shared by the loader,
//! the bootstrap sequence and the registry.

// Registry
pub const DEFAULT_MAX_VARIABLE_LENGTH: usize = 1024;
/// Shortest composite key limit accepted; `<id>.<name>` needs room for both
pub const MIN_VARIABLE_LENGTH: usize = 16;

// Logging
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const LOCK_TRACE_DIRECTIVE: &str = "hibench::locks=trace";

// Configuration
pub const ENV_PREFIX: &str = "HIBENCH_";
pub const CONFIG_FILE_STEM: &str = "hibench";
