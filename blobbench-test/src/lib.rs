//! Test utilities for the blobbench crates.
//!
//! See the modules for all available utilities.

pub mod output;
pub mod tracing;
