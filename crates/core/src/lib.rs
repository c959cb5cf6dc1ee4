//! # hibench Core
//!
//! Scoped variable registry for the health engine.
//!
//! This crate contains:
//! - Per-scope symbol tables (chart, family, host)
//! - Chart-variable bindings that register one value under five keys
//! - Custom variables that alarms and plugins can set
//! - The port the alarm engine implements to re-link after renames
//!
//! ## Architecture Principles
//! - Only depends on `hibench-common` and `hibench-domain`
//! - All locking goes through the cancellation-safe primitives of
//!   `hibench-common`
//! - The alarm engine is reached via the [`AlarmLinker`] trait

pub mod charts;
pub mod errors;
pub mod registry;

/// Tracing target of every registry and binding diagnostic
pub const VARIABLES_TARGET: &str = "hibench::variables";

pub use charts::{
    AlarmLinker, Chart, ChartVariable, ChartVariableOptions, ChartVariableSnapshot, ChartView, Family, Host,
    NoopAlarmLinker,
};
pub use errors::{CoreError, CoreResult};
pub use registry::{
    fix_name, simple_hash, RegistryOptions, Scope, Value, ValueCell, Variable, VariableIndex, VariableOptions,
    VariableType,
};
