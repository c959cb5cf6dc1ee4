//! Port interfaces for the collaborators of the chart layer
//!
//! These traits define the boundary between the variable registry and the
//! alarm-expression engine that consumes it.

use super::chart::Chart;

/// Re-links alarm expressions after a chart's variables changed keys
pub trait AlarmLinker: Send + Sync {
    /// Attach every alarm whose expression matches `chart`
    ///
    /// Called after [`Chart::rename_all`] has released the chart lock, so the
    /// linker may resolve variables through the chart.
    fn link_matching(&self, chart: &Chart);
}

/// Linker for hosts without an alarm engine
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlarmLinker;

impl AlarmLinker for NoopAlarmLinker {
    fn link_matching(&self, _chart: &Chart) {}
}
