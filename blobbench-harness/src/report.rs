//! Everything observed during a benchmark run.

use std::collections::BTreeSet;

use crate::adapter::AdapterError;
use crate::aggregate::{ResultRow, aggregate_with};
use crate::measurement::{Measurement, Operation};

/// A backend that could not be benchmarked at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendFailure {
    /// The name of the backend.
    pub backend: String,
    /// Rendered error chain of the connection failure.
    pub error: String,
}

/// Append-only record of a benchmark run.
///
/// Holds all measurements, the (backend, size) pairs that were started, and the backends that
/// failed to connect.
#[derive(Debug, Default)]
pub struct Report {
    batch_size: usize,
    pairs: Vec<(String, u64)>,
    measurements: Vec<Measurement>,
    failures: Vec<BackendFailure>,
}

impl Report {
    /// Creates an empty report for a run with the given batch size.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    /// Marks a (backend, size) pair as started.
    ///
    /// Every started pair yields one row per [`Operation`], even without measurements.
    pub fn start_pair(&mut self, backend: &str, blob_size: u64) {
        self.pairs.push((backend.to_owned(), blob_size));
    }

    /// Appends a measurement.
    pub fn record(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    /// Records that a backend could not be set up.
    pub fn record_backend_failure(&mut self, backend: &str, error: &AdapterError) {
        self.failures.push(BackendFailure {
            backend: backend.to_owned(),
            error: render_chain(error),
        });
    }

    /// All measurements in the order they were taken.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Backends that failed to connect.
    pub fn backend_failures(&self) -> &[BackendFailure] {
        &self.failures
    }

    /// Names of all backends with at least one successful measurement.
    pub fn successful_backends(&self) -> BTreeSet<&str> {
        self.measurements
            .iter()
            .filter(|m| m.outcome.is_success())
            .map(|m| m.backend.as_str())
            .collect()
    }

    /// Returns `true` if any backend produced at least one successful measurement.
    pub fn has_successes(&self) -> bool {
        self.measurements.iter().any(|m| m.outcome.is_success())
    }

    /// Aggregates the report into exactly one row per (backend, size, operation).
    pub fn rows(&self) -> Vec<ResultRow> {
        let expected = self.pairs.iter().flat_map(|(backend, size)| {
            Operation::ALL.into_iter().map(move |op| {
                ((backend.as_str(), *size, op), op.blobs_per_op(self.batch_size))
            })
        });
        aggregate_with(&self.measurements, expected)
    }
}

fn render_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
