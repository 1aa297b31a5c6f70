//! Services
//!
//! Business logic of the application. The drill-down pipeline is the only
//! service; the binary and library callers go through `DrilldownRunner`.

pub mod drilldown;

pub use drilldown::DrilldownRunner;
