//! Parameters of a benchmark run.

use std::time::Duration;

use thiserror::Error;

/// Default per-call timeout applied by the runner.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable parameters of a benchmark run.
///
/// Constructed once at startup and passed by reference into the runner. Use
/// [`validate`](Self::validate) to check the parameters before running.
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    /// Blob sizes in bytes, strictly positive and strictly ascending.
    pub sizes: Vec<u64>,
    /// Number of blobs per batch operation.
    pub batch_size: usize,
    /// Number of measured single write/read trials per (backend, size) pair.
    pub trials: usize,
    /// Number of unmeasured write/read cycles before the trials.
    pub warmups: usize,
    /// Number of measured batch write/read cycles per pair.
    ///
    /// With more than one repetition, `warmups` batch cycles run first.
    pub batch_repetitions: usize,
    /// Compare read contents against what was written.
    pub verify: bool,
    /// Seed for blob contents. Random when unset.
    pub seed: Option<u64>,
    /// Upper bound for every single adapter call.
    pub operation_timeout: Duration,
    /// Show progress and log per-trial timings.
    pub verbose: bool,
}

impl BenchmarkConfig {
    /// Returns the sizes `2^start..=2^end`.
    pub fn power_of_two_sizes(start: u32, end: u32) -> Vec<u64> {
        (start..=end).filter_map(|p| 1u64.checked_shl(p)).collect()
    }

    /// Checks all parameters, see [`ConfigError`] for the conditions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sizes.is_empty() {
            return Err(ConfigError::NoSizes);
        }
        if self.sizes.contains(&0) {
            return Err(ConfigError::ZeroSize);
        }
        if let Some(pair) = self.sizes.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::UnorderedSizes {
                previous: pair[0],
                next: pair[1],
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Total bytes a full run writes into a single backend.
    ///
    /// Saturates at `u64::MAX` for sweeps that large.
    pub fn bytes_per_backend(&self) -> u64 {
        let single_cycles = self.warmups.saturating_add(self.trials) as u64;
        let batch_cycles = if self.batch_repetitions > 1 {
            self.warmups.saturating_add(self.batch_repetitions)
        } else {
            self.batch_repetitions
        } as u64;
        let batch_blobs = batch_cycles.saturating_mul(self.batch_size as u64);
        let blobs = single_cycles.saturating_add(batch_blobs);
        self.sizes
            .iter()
            .fold(0, |total: u64, size| total.saturating_add(size.saturating_mul(blobs)))
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            sizes: Self::power_of_two_sizes(10, 20),
            batch_size: 1000,
            trials: 10,
            warmups: 1,
            batch_repetitions: 1,
            verify: true,
            seed: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            verbose: false,
        }
    }
}

/// Invalid benchmark parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No blob sizes were configured.
    #[error("at least one blob size is required")]
    NoSizes,
    /// A blob size of zero bytes was configured.
    #[error("blob sizes must be positive")]
    ZeroSize,
    /// Blob sizes are not strictly ascending.
    #[error("blob sizes must be strictly ascending, got {previous} before {next}")]
    UnorderedSizes {
        /// The earlier size.
        previous: u64,
        /// The size that does not exceed it.
        next: u64,
    },
    /// The batch size is zero.
    #[error("batch size must be positive")]
    ZeroBatchSize,
    /// The operation timeout is zero.
    #[error("operation timeout must be positive")]
    ZeroTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sweep() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.sizes.first(), Some(&1024));
        assert_eq!(config.sizes.last(), Some(&(1 << 20)));
        assert_eq!(config.sizes.len(), 11);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_invalid_sizes() {
        let mut config = BenchmarkConfig {
            sizes: vec![],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoSizes));

        config.sizes = vec![0, 10];
        assert_eq!(config.validate(), Err(ConfigError::ZeroSize));

        config.sizes = vec![10, 10];
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnorderedSizes {
                previous: 10,
                next: 10
            })
        );
    }

    #[test]
    fn rejects_zero_batch() {
        let config = BenchmarkConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));
    }

    #[test]
    fn zero_trials_are_valid() {
        let config = BenchmarkConfig {
            trials: 0,
            warmups: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn estimates_volume() {
        let config = BenchmarkConfig {
            sizes: vec![100, 200],
            batch_size: 10,
            trials: 4,
            warmups: 1,
            batch_repetitions: 1,
            ..Default::default()
        };
        // 5 single blobs plus one batch of 10 per size
        assert_eq!(config.bytes_per_backend(), 15 * 300);
    }

    #[test]
    fn volume_of_huge_sweep_saturates() {
        let config = BenchmarkConfig {
            sizes: BenchmarkConfig::power_of_two_sizes(10, 63),
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.bytes_per_backend(), u64::MAX);
    }
}
