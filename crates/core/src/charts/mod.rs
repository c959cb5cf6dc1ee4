//! Charts, families and hosts, and the bindings that expose chart values in
//! all three scopes

pub mod binding;
pub mod chart;
pub mod host;
pub mod ports;

pub use binding::{ChartVariable, ChartVariableOptions};
pub use chart::{Chart, ChartVariableSnapshot, ChartView};
pub use host::{Family, Host};
pub use ports::{AlarmLinker, NoopAlarmLinker};
