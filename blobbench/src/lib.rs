//! Command line tool benchmarking blob storage backends.
//!
//! `blobbench run` sweeps the configured blob sizes across all configured backends and writes a
//! summary and the raw samples as CSV. `blobbench compare` puts the backends of a summary file in
//! relation to a baseline. See [`config`] for the configuration layers.
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod compare;
pub mod config;
pub mod observability;
pub mod plan;
pub mod summary;
