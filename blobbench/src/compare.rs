//! Compares backends in a summary file against a baseline backend.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, bail};
use blobbench_harness::{Operation, ResultRow};
use bytesize::ByteSize;
use yansi::Paint;

/// Mean durations of all backends per (blob size, operation), relative to a baseline.
#[derive(Debug, PartialEq)]
pub struct Comparison {
    baseline: String,
    backends: Vec<String>,
    /// Means in the order of `backends`.
    entries: BTreeMap<(u64, Operation), Vec<Option<f64>>>,
}

impl Comparison {
    /// Builds the comparison from summary rows.
    ///
    /// The baseline defaults to the first backend by name.
    pub fn build(
        rows: &[ResultRow],
        baseline: Option<&str>,
        operation: Option<Operation>,
    ) -> Result<Self> {
        let mut backends: Vec<String> = rows.iter().map(|row| row.backend.clone()).collect();
        backends.sort();
        backends.dedup();

        let baseline = match baseline {
            Some(name) if backends.iter().any(|backend| backend == name) => name.to_owned(),
            Some(name) => bail!("baseline backend {name:?} does not appear in the summary"),
            None => match backends.first() {
                Some(first) => first.clone(),
                None => bail!("summary contains no rows"),
            },
        };

        let mut entries = BTreeMap::new();
        for row in rows {
            if operation.is_some_and(|op| op != row.operation) {
                continue;
            }
            let Ok(index) = backends.binary_search(&row.backend) else {
                continue;
            };
            entries
                .entry((row.blob_size_bytes, row.operation))
                .or_insert_with(|| vec![None; backends.len()])[index] = row.mean_duration_ms;
        }

        Ok(Self {
            baseline,
            backends,
            entries,
        })
    }

    /// Loads a summary CSV file and builds the comparison.
    pub fn from_path(
        path: &Path,
        baseline: Option<&str>,
        operation: Option<Operation>,
    ) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<ResultRow>, _>>()
            .with_context(|| format!("failed to parse {}", path.display()))?;

        Self::build(&rows, baseline, operation)
    }

    /// Mean duration of `backend` divided by the mean of the baseline.
    pub fn ratio(&self, blob_size: u64, operation: Operation, backend: &str) -> Option<f64> {
        let means = self.entries.get(&(blob_size, operation))?;
        let mean_of = |name: &str| {
            let index = self.backends.binary_search_by(|b| b.as_str().cmp(name)).ok()?;
            means[index]
        };

        let base = mean_of(&self.baseline).filter(|base| *base > 0.0)?;
        Some(mean_of(backend)? / base)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} (baseline {})",
            "## Comparison".bold(),
            self.baseline.bold().blue()
        )?;

        for (&(size, operation), means) in &self.entries {
            writeln!(
                f,
                "{} {}",
                operation.as_str().green(),
                ByteSize::b(size).to_string().bold()
            )?;
            for (backend, mean) in self.backends.iter().zip(means) {
                write!(f, "  {backend:<16} ")?;
                match mean {
                    Some(mean) => write!(f, "{mean:>12.3} ms")?,
                    None => write!(f, "{:>15}", "N/A")?,
                }
                match self.ratio(size, operation, backend) {
                    Some(ratio) if *backend == self.baseline => writeln!(f, "  x{ratio:.2}")?,
                    Some(ratio) if ratio > 1.0 => {
                        writeln!(f, "  {}", format!("x{ratio:.2}").red())?
                    }
                    Some(ratio) => writeln!(f, "  {}", format!("x{ratio:.2}").green())?,
                    None => writeln!(f, "  N/A")?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn row(backend: &str, size: u64, operation: Operation, mean: Option<f64>) -> ResultRow {
        ResultRow {
            mean_duration_ms: mean,
            ..ResultRow::empty(backend, size, operation, 1)
        }
    }

    fn rows() -> Vec<ResultRow> {
        vec![
            row("mongodb", 1024, Operation::Write, Some(4.0)),
            row("mongodb", 1024, Operation::Read, None),
            row("memory", 1024, Operation::Write, Some(2.0)),
            row("memory", 1024, Operation::Read, Some(1.0)),
        ]
    }

    #[test]
    fn defaults_to_first_backend() {
        let comparison = Comparison::build(&rows(), None, None).unwrap();

        assert_eq!(comparison.baseline, "memory");
        assert_eq!(comparison.ratio(1024, Operation::Write, "mongodb"), Some(2.0));
        assert_eq!(comparison.ratio(1024, Operation::Write, "memory"), Some(1.0));
        assert_eq!(comparison.ratio(1024, Operation::Read, "mongodb"), None);
    }

    #[test]
    fn explicit_baseline() {
        let comparison = Comparison::build(&rows(), Some("mongodb"), None).unwrap();
        assert_eq!(comparison.ratio(1024, Operation::Write, "memory"), Some(0.5));
        // no baseline data
        assert_eq!(comparison.ratio(1024, Operation::Read, "memory"), None);
    }

    #[test]
    fn filters_operation() {
        let comparison = Comparison::build(&rows(), None, Some(Operation::Read)).unwrap();
        assert_eq!(comparison.entries.len(), 1);
        assert!(comparison.to_string().contains("N/A"));
    }

    #[test]
    fn rejects_unknown_baseline() {
        assert!(Comparison::build(&rows(), Some("cassandra"), None).is_err());
        assert!(Comparison::build(&[], None, None).is_err());
    }

    #[test]
    fn reads_summary_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"backend,blob_size_bytes,operation,batch_size,mean_duration_ms,min_duration_ms,\
              p50_duration_ms,p90_duration_ms,p99_duration_ms,max_duration_ms,throughput_mib_s,\
              trial_count,failure_count\n\
              a,1024,write,1,2.0000,N/A,N/A,N/A,N/A,N/A,N/A,5,0\n\
              b,1024,write,1,3.0000,N/A,N/A,N/A,N/A,N/A,N/A,5,0\n",
        )
        .unwrap();

        let comparison = Comparison::from_path(file.path(), None, None).unwrap();
        assert_eq!(comparison.ratio(1024, Operation::Write, "b"), Some(1.5));
    }
}
