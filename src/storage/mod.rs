//! Storage Layer
//!
//! Configuration file handling. Nothing about a run is persisted.

pub mod config;

pub use config::*;
