//! Call-site instrumentation for the lock primitives
//!
//! Emitted at `TRACE` on [`LOCK_TRACE_TARGET`]. When that target is filtered
//! out nothing is timed and nothing is formatted, so the wrappers cost a
//! single `enabled!` check.

use std::panic::Location;
use std::time::Instant;

use tracing::{trace, Level};

/// Tracing target of the lock instrumentation (`RUST_LOG=hibench::locks=trace`)
pub const LOCK_TRACE_TARGET: &str = "hibench::locks";

fn tracing_enabled() -> bool {
    tracing::enabled!(target: LOCK_TRACE_TARGET, Level::TRACE)
}

/// One traced lock operation, from call to outcome
pub(crate) struct LockTrace<'a> {
    kind: &'static str,
    operation: &'static str,
    label: Option<&'a str>,
    location: &'static Location<'static>,
    start: Option<Instant>,
}

impl<'a> LockTrace<'a> {
    pub(crate) fn begin(
        kind: &'static str,
        operation: &'static str,
        label: Option<&'a str>,
        location: &'static Location<'static>,
    ) -> Self {
        let start = if tracing_enabled() {
            trace!(
                target: LOCK_TRACE_TARGET,
                lock = label.unwrap_or("-"),
                file = location.file(),
                line = location.line(),
                "{kind}: {operation}() requested"
            );
            Some(Instant::now())
        } else {
            None
        };

        Self { kind, operation, label, location, start }
    }

    pub(crate) fn finish(self, outcome: &'static str) {
        if let Some(start) = self.start {
            let kind = self.kind;
            let operation = self.operation;
            trace!(
                target: LOCK_TRACE_TARGET,
                lock = self.label.unwrap_or("-"),
                file = self.location.file(),
                line = self.location.line(),
                outcome,
                elapsed_us = start.elapsed().as_micros() as u64,
                "{kind}: {operation}() finished"
            );
        }
    }

    /// Carry the call site into the guard so the release is traced too
    pub(crate) fn release_trace(&self) -> ReleaseTrace<'a> {
        ReleaseTrace {
            kind: self.kind,
            label: self.label,
            location: self.location,
            acquired: self.start.map(|_| Instant::now()),
        }
    }
}

/// Traces the release of a guard; dropped right after the raw lock is released
pub(crate) struct ReleaseTrace<'a> {
    kind: &'static str,
    label: Option<&'a str>,
    location: &'static Location<'static>,
    acquired: Option<Instant>,
}

impl Drop for ReleaseTrace<'_> {
    fn drop(&mut self) {
        if let Some(acquired) = self.acquired {
            let kind = self.kind;
            trace!(
                target: LOCK_TRACE_TARGET,
                lock = self.label.unwrap_or("-"),
                file = self.location.file(),
                line = self.location.line(),
                held_us = acquired.elapsed().as_micros() as u64,
                "{kind}: unlock()"
            );
        }
    }
}
