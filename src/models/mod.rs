//! Data Models
//!
//! Configuration and run report structures used by the root crate.

pub mod report;
pub mod settings;

pub use report::*;
pub use settings::*;
