//! Integration Tests Module
//!
//! Drives `DrilldownRunner` end to end with a scripted generator and an
//! in-memory warehouse.

// Shared test doubles
mod common;

// Control loop scenarios
mod drilldown_test;

// Configuration file round trips
mod config_test;

// Query guard refusals and repairs
mod guard_test;
