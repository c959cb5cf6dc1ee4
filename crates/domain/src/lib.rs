//! # hibench Domain
//!
//! Configuration and domain-level definitions for hibench.
//!
//! This crate contains:
//! - Configuration structures (threads, registry, logging)
//! - Domain error types and Result definitions
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other hibench crates
//! - Only external dependencies allowed

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
