//! # hibench Infrastructure
//!
//! Process-level wiring around the registry.
//!
//! This crate contains:
//! - Configuration loading (environment, JSON and TOML files)
//! - Tracing subscriber setup
//! - The startup sequence that applies a configuration
//!
//! ## Architecture
//! - Depends on `hibench-common`, `hibench-domain` and `hibench-core`
//! - Contains all "impure" code (environment, files, global subscriber)

pub mod bootstrap;
pub mod config;
pub mod logging;

// Re-export commonly used items
pub use bootstrap::{bootstrap, Bootstrapped};
