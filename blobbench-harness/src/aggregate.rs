//! Aggregation of measurements into summary rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sketches_ddsketch::DDSketch;

use crate::measurement::{Measurement, Operation};
use crate::timer::as_millis_f64;

const MIB: f64 = (1 << 20) as f64;

/// Summary statistics for one (backend, blob size, operation) coordinate.
///
/// Timing statistics only consider successful measurements. If there are none, every timing
/// column is `None`, which serializes as `N/A`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ResultRow {
    /// The name of the backend.
    pub backend: String,
    /// The size of each blob in bytes.
    pub blob_size_bytes: u64,
    /// The measured operation.
    pub operation: Operation,
    /// Blobs covered by one operation.
    pub batch_size: usize,
    /// Arithmetic mean over successful measurements.
    #[serde(with = "na")]
    pub mean_duration_ms: Option<f64>,
    /// Fastest successful measurement.
    #[serde(with = "na")]
    pub min_duration_ms: Option<f64>,
    /// Median of successful measurements.
    #[serde(with = "na")]
    pub p50_duration_ms: Option<f64>,
    /// 90th percentile of successful measurements.
    #[serde(with = "na")]
    pub p90_duration_ms: Option<f64>,
    /// 99th percentile of successful measurements.
    #[serde(with = "na")]
    pub p99_duration_ms: Option<f64>,
    /// Slowest successful measurement.
    #[serde(with = "na")]
    pub max_duration_ms: Option<f64>,
    /// Throughput derived from the mean duration.
    #[serde(with = "na")]
    pub throughput_mib_s: Option<f64>,
    /// All measurements for this coordinate, including failures.
    pub trial_count: usize,
    /// Failed measurements for this coordinate.
    pub failure_count: usize,
}

impl ResultRow {
    /// Column names of the summary file, in field order.
    pub const HEADER: &'static [&'static str] = &[
        "backend",
        "blob_size_bytes",
        "operation",
        "batch_size",
        "mean_duration_ms",
        "min_duration_ms",
        "p50_duration_ms",
        "p90_duration_ms",
        "p99_duration_ms",
        "max_duration_ms",
        "throughput_mib_s",
        "trial_count",
        "failure_count",
    ];

    /// Creates a row without any measurements.
    pub fn empty(backend: &str, blob_size: u64, operation: Operation, batch_size: usize) -> Self {
        Self {
            backend: backend.to_owned(),
            blob_size_bytes: blob_size,
            operation,
            batch_size,
            mean_duration_ms: None,
            min_duration_ms: None,
            p50_duration_ms: None,
            p90_duration_ms: None,
            p99_duration_ms: None,
            max_duration_ms: None,
            throughput_mib_s: None,
            trial_count: 0,
            failure_count: 0,
        }
    }

    /// Returns `true` if at least one measurement succeeded.
    pub fn has_data(&self) -> bool {
        self.mean_duration_ms.is_some()
    }

    fn summarize<'a>(mut self, measurements: impl IntoIterator<Item = &'a Measurement>) -> Self {
        let mut sketch = DDSketch::default();
        let mut total = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for measurement in measurements {
            self.trial_count += 1;
            if !measurement.outcome.is_success() {
                self.failure_count += 1;
                continue;
            }
            let millis = as_millis_f64(measurement.elapsed);
            sketch.add(millis);
            total += millis;
            min = min.min(millis);
            max = max.max(millis);
        }

        let successes = sketch.count();
        if successes == 0 {
            return self;
        }

        let mean = total / successes as f64;
        let quantile = |q| sketch.quantile(q).ok().flatten();

        self.mean_duration_ms = Some(mean);
        self.min_duration_ms = Some(min);
        self.p50_duration_ms = quantile(0.5);
        self.p90_duration_ms = quantile(0.9);
        self.p99_duration_ms = quantile(0.99);
        self.max_duration_ms = Some(max);
        self.throughput_mib_s = (mean > 0.0).then(|| {
            let bytes = self.blob_size_bytes as f64 * self.batch_size as f64;
            bytes / MIB / (mean / 1000.0)
        });
        self
    }
}

type GroupKey<'a> = (&'a str, u64, Operation);

/// Groups measurements by (backend, blob size, operation) and summarizes each group.
///
/// Rows are sorted by backend name, blob size and then operation. Aggregating the same
/// measurements again yields identical rows.
pub fn aggregate(measurements: &[Measurement]) -> Vec<ResultRow> {
    aggregate_with(measurements, std::iter::empty())
}

/// Like [`aggregate`], but also emits an empty row for every expected coordinate that has no
/// measurements at all.
pub(crate) fn aggregate_with<'a>(
    measurements: &'a [Measurement],
    expected: impl IntoIterator<Item = (GroupKey<'a>, usize)>,
) -> Vec<ResultRow> {
    let mut groups: BTreeMap<GroupKey<'a>, (usize, Vec<&'a Measurement>)> = BTreeMap::new();

    for (key, batch_size) in expected {
        groups.entry(key).or_insert_with(|| (batch_size, Vec::new()));
    }
    for measurement in measurements {
        let key = (
            measurement.backend.as_str(),
            measurement.blob_size,
            measurement.operation,
        );
        groups
            .entry(key)
            .or_insert_with(|| (measurement.batch_size, Vec::new()))
            .1
            .push(measurement);
    }

    groups
        .into_iter()
        .map(|((backend, size, operation), (batch_size, group))| {
            ResultRow::empty(backend, size, operation, batch_size).summarize(group)
        })
        .collect()
}

/// (De)serializes optional statistics, writing `N/A` for missing values.
mod na {
    use serde::{Deserialize, Deserializer, Serializer};

    pub const SENTINEL: &str = "N/A";

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(&format_args!("{value:.4}")),
            None => serializer.serialize_str(SENTINEL),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<f64>, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == SENTINEL || s.is_empty() {
            return Ok(None);
        }
        s.parse().map(Some).map_err(serde::de::Error::custom)
    }
}
