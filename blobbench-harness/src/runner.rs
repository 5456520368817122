//! Drives adapters through warmups, trials and batch operations.
//!
//! Backends are benchmarked one after another, and for each backend the blob sizes are swept in
//! ascending order. Everything runs sequentially on the calling task, so no two measurements ever
//! contend for the same resources.

use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;

use bytes::Bytes;
use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Instrument;

use crate::adapter::{AdapterError, AdapterResult, BoxedAdapter, Connection};
use crate::blob::{Blob, BlobGenerator, BlobKey, KeySource};
use crate::config::{BenchmarkConfig, ConfigError};
use crate::measurement::{FailureKind, Measurement, Operation, Outcome};
use crate::report::Report;
use crate::timer::{as_millis_f64, measure_with_timeout};

/// An adapter together with the name it is reported under.
#[derive(Debug)]
pub struct NamedAdapter {
    /// The name used in logs and output rows.
    pub name: String,
    /// The adapter to benchmark.
    pub adapter: BoxedAdapter,
}

impl NamedAdapter {
    /// Creates a named adapter.
    pub fn new(name: impl Into<String>, adapter: BoxedAdapter) -> Self {
        Self {
            name: name.into(),
            adapter,
        }
    }
}

/// Runs the full benchmark against all adapters in order.
///
/// A backend that fails to connect is recorded in the report and skipped. Failed operations are
/// recorded as failed measurements and never abort the run. Only invalid parameters fail the run
/// as a whole.
pub async fn run(
    config: &BenchmarkConfig,
    adapters: Vec<NamedAdapter>,
) -> Result<Report, ConfigError> {
    config.validate()?;
    if config.trials == 0 {
        tracing::warn!("no trials configured, single write and read rows will be empty");
    }

    let mut runner = TrialRunner::new(config);
    let mut report = Report::new(config.batch_size);

    for NamedAdapter { name, adapter } in adapters {
        let span = tracing::info_span!("backend", backend = %name, kind = adapter.kind());
        runner
            .run_backend(&name, &adapter, &mut report)
            .instrument(span)
            .await;
    }

    Ok(report)
}

struct TrialRunner<'a> {
    config: &'a BenchmarkConfig,
    generator: BlobGenerator,
    keys: KeySource,
}

/// Which of the measurements of a cycle end up in the report.
#[derive(Clone, Copy, Debug)]
enum Phase {
    Warmup,
    Measured(usize),
}

impl<'a> TrialRunner<'a> {
    fn new(config: &'a BenchmarkConfig) -> Self {
        let generator = match config.seed {
            Some(seed) => BlobGenerator::new(seed),
            None => BlobGenerator::from_entropy(),
        };

        Self {
            config,
            generator,
            keys: KeySource::new(),
        }
    }

    fn timeout(&self) -> Duration {
        self.config.operation_timeout
    }

    fn next_blob(&mut self, size: u64) -> Blob {
        let key = self.keys.next_key();
        self.generator.generate(key, size)
    }

    async fn run_backend(&mut self, name: &str, adapter: &BoxedAdapter, report: &mut Report) {
        tracing::info!("connecting");
        let timeout = self.timeout();
        let connected = match tokio::time::timeout(timeout, adapter.connect()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::connection(
                "connect",
                format!("no response within {timeout:?}"),
            )),
        };

        let mut connection = match connected {
            Ok(connection) => connection,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn Error,
                    "failed to connect, skipping backend"
                );
                report.record_backend_failure(name, &error);
                return;
            }
        };
        tracing::debug!("connected");

        for &size in &self.config.sizes {
            let span = tracing::info_span!("pair", size = %ByteSize::b(size));
            report.start_pair(name, size);
            self.run_pair(name, size, connection.as_mut(), report)
                .instrument(span)
                .await;
        }

        let closed = match tokio::time::timeout(timeout, connection.close()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                operation: "close",
                timeout,
            }),
        };
        match closed {
            Ok(()) => tracing::info!("closed connection"),
            Err(error) => tracing::warn!(
                error = &error as &dyn Error,
                "failed to close connection"
            ),
        }
    }

    async fn run_pair(
        &mut self,
        name: &str,
        size: u64,
        connection: &mut dyn Connection,
        report: &mut Report,
    ) {
        let config = self.config;
        let (batch_warmups, batch_repetitions) = if config.batch_repetitions > 1 {
            (config.warmups, config.batch_repetitions)
        } else {
            (0, config.batch_repetitions)
        };

        let progress = self.progress_bar(
            name,
            size,
            config.warmups + config.trials + batch_warmups + batch_repetitions,
        );

        tracing::debug!(warmups = config.warmups, "warming up");
        for _ in 0..config.warmups {
            self.single_cycle(name, size, Phase::Warmup, connection, report)
                .await;
            progress.inc(1);
        }

        for trial in 0..config.trials {
            self.single_cycle(name, size, Phase::Measured(trial), connection, report)
                .await;
            progress.inc(1);
        }

        for _ in 0..batch_warmups {
            self.batch_cycle(name, size, Phase::Warmup, connection, report)
                .await;
            progress.inc(1);
        }

        for repetition in 0..batch_repetitions {
            self.batch_cycle(name, size, Phase::Measured(repetition), connection, report)
                .await;
            progress.inc(1);
        }

        progress.finish_and_clear();
        tracing::info!("finished pair");
    }

    async fn single_cycle(
        &mut self,
        name: &str,
        size: u64,
        phase: Phase,
        connection: &mut dyn Connection,
        report: &mut Report,
    ) {
        let blob = self.next_blob(size);
        let timeout = self.timeout();

        let (written, write_elapsed) =
            measure_with_timeout(Operation::Write, timeout, connection.write_one(&blob)).await;
        let write_outcome = outcome_of(Operation::Write, &written);

        let (read, read_elapsed) = measure_with_timeout(
            Operation::Read,
            timeout,
            connection.read_one(blob.key()),
        )
        .await;
        let read_outcome = match read {
            Ok(read) if self.config.verify && read.data() != blob.data() => {
                tracing::warn!(key = %blob.key(), "read returned different contents");
                Outcome::Failed(FailureKind::Mismatch)
            }
            result => outcome_of(Operation::Read, &result),
        };

        let Phase::Measured(trial) = phase else {
            return;
        };

        if self.config.verbose {
            tracing::debug!(
                trial,
                write_ms = as_millis_f64(write_elapsed),
                read_ms = as_millis_f64(read_elapsed),
                "trial finished"
            );
        }

        let measurement = |operation, elapsed, outcome| Measurement {
            backend: name.to_owned(),
            blob_size: size,
            operation,
            batch_size: 1,
            trial,
            elapsed,
            outcome,
        };
        report.record(measurement(Operation::Write, write_elapsed, write_outcome));
        report.record(measurement(Operation::Read, read_elapsed, read_outcome));
    }

    async fn batch_cycle(
        &mut self,
        name: &str,
        size: u64,
        phase: Phase,
        connection: &mut dyn Connection,
        report: &mut Report,
    ) {
        let batch_size = self.config.batch_size;
        let blobs: Vec<Blob> = (0..batch_size).map(|_| self.next_blob(size)).collect();
        let keys: Vec<BlobKey> = blobs.iter().map(Blob::key).collect();
        let timeout = self.timeout();

        let (written, write_elapsed) = measure_with_timeout(
            Operation::BatchWrite,
            timeout,
            connection.write_batch(&blobs),
        )
        .await;
        let write_outcome = outcome_of(Operation::BatchWrite, &written);

        let (read, read_elapsed) =
            measure_with_timeout(Operation::BatchRead, timeout, connection.read_batch(&keys))
                .await;
        let read_outcome = match &read {
            Ok(read) => self.check_batch(&blobs, read),
            Err(_) => outcome_of(Operation::BatchRead, &read),
        };

        let Phase::Measured(repetition) = phase else {
            return;
        };

        if self.config.verbose {
            tracing::debug!(
                repetition,
                write_ms = as_millis_f64(write_elapsed),
                read_ms = as_millis_f64(read_elapsed),
                "batch finished"
            );
        }

        let measurement = |operation, elapsed, outcome| Measurement {
            backend: name.to_owned(),
            blob_size: size,
            operation,
            batch_size,
            trial: repetition,
            elapsed,
            outcome,
        };
        report.record(measurement(Operation::BatchWrite, write_elapsed, write_outcome));
        report.record(measurement(Operation::BatchRead, read_elapsed, read_outcome));
    }

    fn check_batch(&self, written: &[Blob], read: &[Blob]) -> Outcome {
        if read.len() != written.len() {
            tracing::warn!(
                expected = written.len(),
                actual = read.len(),
                "batch read returned a different number of blobs"
            );
            return Outcome::Failed(FailureKind::Cardinality);
        }
        if !self.config.verify {
            return Outcome::Success;
        }

        let expected: HashMap<BlobKey, &Bytes> =
            written.iter().map(|blob| (blob.key(), blob.data())).collect();
        let matches = read
            .iter()
            .all(|blob| expected.get(&blob.key()) == Some(&blob.data()));
        if !matches {
            tracing::warn!("batch read returned different contents");
            return Outcome::Failed(FailureKind::Mismatch);
        }
        Outcome::Success
    }

    fn progress_bar(&self, name: &str, size: u64, steps: usize) -> ProgressBar {
        if !self.config.verbose {
            return ProgressBar::hidden();
        }

        let style = ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len} {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(steps as u64)
            .with_style(style)
            .with_message(format!("{name} {}", ByteSize::b(size)))
    }
}

fn outcome_of<T>(operation: Operation, result: &AdapterResult<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(error) => {
            tracing::debug!(
                %operation,
                error = error as &dyn Error,
                "operation failed"
            );
            Outcome::Failed(error.kind())
        }
    }
}
