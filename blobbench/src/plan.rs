//! Describes a run before it starts.

use std::fmt;

use blobbench_harness::BenchmarkConfig;
use bytesize::ByteSize;
use yansi::Paint;

/// What a run is going to do.
#[derive(Debug)]
pub struct Plan<'a> {
    benchmark: &'a BenchmarkConfig,
    backends: Vec<(&'a str, &'static str)>,
}

impl<'a> Plan<'a> {
    /// Creates a plan for the given `(name, kind)` backends.
    pub fn new(benchmark: &'a BenchmarkConfig, backends: Vec<(&'a str, &'static str)>) -> Self {
        Self {
            benchmark,
            backends,
        }
    }

    /// Human readable list of blob sizes.
    pub fn sizes(&self) -> String {
        self.benchmark
            .sizes
            .iter()
            .map(|size| ByteSize::b(*size).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Total bytes written into a single backend.
    pub fn bytes_per_backend(&self) -> ByteSize {
        ByteSize::b(self.benchmark.bytes_per_backend())
    }

    /// Logs the plan at INFO level.
    pub fn log(&self) {
        let backends: Vec<_> = self.backends.iter().map(|(name, _)| *name).collect();
        tracing::info!(
            sizes = %self.sizes(),
            trials = self.benchmark.trials,
            warmups = self.benchmark.warmups,
            batch_size = self.benchmark.batch_size,
            batch_repetitions = self.benchmark.batch_repetitions,
            backends = %backends.join(", "),
            bytes_per_backend = %self.bytes_per_backend(),
            "benchmark plan"
        );
    }
}

impl fmt::Display for Plan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.benchmark;
        writeln!(f, "{}", "## Plan".bold())?;
        writeln!(f, "  sizes: {}", self.sizes())?;
        writeln!(
            f,
            "  trials: {}; warmups: {}; batch size: {}; batch repetitions: {}",
            b.trials.bold(),
            b.warmups.bold(),
            b.batch_size.bold(),
            b.batch_repetitions.bold()
        )?;
        writeln!(
            f,
            "  verify: {}; timeout per call: {:?}",
            b.verify, b.operation_timeout
        )?;
        writeln!(f, "  writes {} per backend", self.bytes_per_backend().bold())?;

        writeln!(f, "{}", "## Backends".bold())?;
        for (name, kind) in &self.backends {
            writeln!(f, "  {} ({kind})", name.bold().blue())?;
        }
        Ok(())
    }
}
