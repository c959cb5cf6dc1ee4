//! Concurrency primitives and error taxonomy shared across hibench crates.
//!
//! # Safety and Quality
//!
//! No unsafe code. Thread cancellation is cooperative and deferred: a thread
//! stops only at a cancellation point, and never while it holds a lock taken
//! through [`sync`].
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error taxonomy and classification
//! - `runtime`: cancellation guard, lock primitives, thread lifecycle manager
//! - `observability`: tracing diagnostics (implied by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod sync;
#[cfg(feature = "runtime")]
pub mod thread;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use sync::{CancelGuard, CancelState, Cancelled, Mutex, RwLock};
#[cfg(feature = "runtime")]
pub use thread::{ThreadExit, ThreadHandle, ThreadOptions};
