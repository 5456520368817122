//! The benchmark harness shared by all storage backends.
//!
//! A run sweeps a list of blob sizes across a set of backends. For every (backend, size) pair the
//! [`runner`] performs unmeasured warmups, then measured single write/read trials, and finally
//! batch writes and reads. All timings end up in a [`Report`], which can be aggregated into
//! [`ResultRow`]s and persisted as CSV through the [`ResultWriter`].
//!
//! Backends plug in through the [`SystemAdapter`] and [`Connection`] traits. This crate ships an
//! [`InMemoryAdapter`] with simulated latency and fault injection, everything else lives in the
//! `blobbench-backends` crate.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod adapter;
pub mod aggregate;
pub mod blob;
pub mod config;
pub mod measurement;
pub mod memory;
pub mod report;
pub mod runner;
pub mod timer;
pub mod writer;

pub use crate::adapter::{AdapterError, AdapterResult, BoxedAdapter, Connection, SystemAdapter};
pub use crate::aggregate::{ResultRow, aggregate};
pub use crate::blob::{Blob, BlobGenerator, BlobKey, KeySource};
pub use crate::config::{BenchmarkConfig, ConfigError};
pub use crate::measurement::{FailureKind, Measurement, Operation, Outcome};
pub use crate::memory::{InMemoryAdapter, MemoryConfig};
pub use crate::report::{BackendFailure, Report};
pub use crate::runner::{NamedAdapter, run};
pub use crate::writer::{ResultWriter, RunLabel, WriterError};
