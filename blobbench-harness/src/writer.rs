//! Persists results as CSV files.
//!
//! Every run writes two files into the output directory, both named after the [`RunLabel`]:
//!
//! - `summary-{run}.csv` with one [`ResultRow`] per (backend, size, operation),
//! - `samples-{run}.csv` with one line per raw [`Measurement`].
//!
//! Existing files of the same name are overwritten.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;

use crate::aggregate::ResultRow;
use crate::measurement::{Measurement, Operation};
use crate::timer::as_millis_f64;

/// Errors writing result files.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The output directory could not be created.
    #[error("failed to create output directory {}", path.display())]
    CreateDir {
        /// The directory that was requested.
        path: PathBuf,
        /// The underlying error.
        #[source]
        cause: std::io::Error,
    },

    /// A result file could not be written.
    #[error("failed to write {}", path.display())]
    Csv {
        /// The file that was being written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        cause: csv::Error,
    },
}

/// Identifies the files of one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunLabel(String);

impl RunLabel {
    /// Creates a label from the given start time, e.g. `2026-10-14T120000Z`.
    pub fn from_time(time: SystemTime) -> Self {
        let rfc3339 = humantime::format_rfc3339_seconds(time).to_string();
        Self(rfc3339.replace(':', ""))
    }

    /// Creates a label from the current time.
    pub fn now() -> Self {
        Self::from_time(SystemTime::now())
    }

    /// Creates a label from an arbitrary string.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

impl fmt::Display for RunLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const SAMPLES_HEADER: &[&str] = &[
    "backend",
    "blob_size_bytes",
    "operation",
    "batch_size",
    "trial",
    "duration_ms",
    "outcome",
];

#[derive(Serialize)]
struct SampleRecord<'a> {
    backend: &'a str,
    blob_size_bytes: u64,
    operation: Operation,
    batch_size: usize,
    trial: usize,
    duration_ms: String,
    outcome: String,
}

impl<'a> From<&'a Measurement> for SampleRecord<'a> {
    fn from(m: &'a Measurement) -> Self {
        Self {
            backend: &m.backend,
            blob_size_bytes: m.blob_size,
            operation: m.operation,
            batch_size: m.batch_size,
            trial: m.trial,
            duration_ms: format!("{:.4}", as_millis_f64(m.elapsed)),
            outcome: m.outcome.to_string(),
        }
    }
}

/// Writes the result files of one run into a directory.
#[derive(Debug)]
pub struct ResultWriter {
    directory: PathBuf,
    label: RunLabel,
}

impl ResultWriter {
    /// Creates a writer for the given directory and run.
    pub fn new(directory: impl Into<PathBuf>, label: RunLabel) -> Self {
        Self {
            directory: directory.into(),
            label,
        }
    }

    /// The path of the summary file.
    pub fn summary_path(&self) -> PathBuf {
        self.directory.join(format!("summary-{}.csv", self.label))
    }

    /// The path of the raw samples file.
    pub fn samples_path(&self) -> PathBuf {
        self.directory.join(format!("samples-{}.csv", self.label))
    }

    /// Writes the summary rows and returns the path of the file.
    pub fn write(&self, rows: &[ResultRow]) -> Result<PathBuf, WriterError> {
        let path = self.summary_path();
        self.write_records(&path, ResultRow::HEADER, rows)?;
        Ok(path)
    }

    /// Writes one line per measurement and returns the path of the file.
    pub fn write_samples(&self, measurements: &[Measurement]) -> Result<PathBuf, WriterError> {
        let path = self.samples_path();
        let records: Vec<SampleRecord<'_>> = measurements.iter().map(Into::into).collect();
        self.write_records(&path, SAMPLES_HEADER, &records)?;
        Ok(path)
    }

    fn write_records<T: Serialize>(
        &self,
        path: &Path,
        header: &[&str],
        records: &[T],
    ) -> Result<(), WriterError> {
        std::fs::create_dir_all(&self.directory).map_err(|cause| WriterError::CreateDir {
            path: self.directory.clone(),
            cause,
        })?;

        let csv_error = |cause| WriterError::Csv {
            path: path.to_owned(),
            cause,
        };

        // the header is written explicitly so that files without records still have one
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(csv_error)?;
        writer.write_record(header).map_err(csv_error)?;
        for record in records {
            writer.serialize(record).map_err(csv_error)?;
        }
        writer
            .flush()
            .map_err(|cause| csv_error(csv::Error::from(cause)))?;

        tracing::debug!(path = %path.display(), records = records.len(), "wrote results");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use crate::measurement::{FailureKind, Outcome};

    use super::*;

    const HEADER: &str = "backend,blob_size_bytes,operation,batch_size,mean_duration_ms,\
        min_duration_ms,p50_duration_ms,p90_duration_ms,p99_duration_ms,max_duration_ms,\
        throughput_mib_s,trial_count,failure_count";

    fn row(backend: &str, op: Operation) -> ResultRow {
        ResultRow {
            mean_duration_ms: Some(2.0),
            trial_count: 5,
            ..ResultRow::empty(backend, 1024, op, 1)
        }
    }

    #[test]
    fn labels_from_time() {
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(RunLabel::from_time(time).to_string(), "2023-11-14T221320Z");
    }

    #[test]
    fn writes_summary_with_header() {
        let tempdir = tempfile::tempdir().unwrap();
        let directory = tempdir.path().join("nested/results");
        let writer = ResultWriter::new(&directory, RunLabel::new("test"));

        let path = writer
            .write(&[
                row("memory", Operation::Write),
                ResultRow::empty("memory", 1024, Operation::Read, 1),
            ])
            .unwrap();

        assert_eq!(path, directory.join("summary-test.csv"));
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(
            lines[1],
            "memory,1024,write,1,2.0000,N/A,N/A,N/A,N/A,N/A,N/A,5,0"
        );
        assert_eq!(lines[2], "memory,1024,read,1,N/A,N/A,N/A,N/A,N/A,N/A,N/A,0,0");
    }

    #[test]
    fn empty_summary_has_header() {
        let tempdir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(tempdir.path(), RunLabel::new("empty"));

        let path = writer.write(&[]).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), format!("{HEADER}\n"));

        let path = writer.write_samples(&[]).unwrap();
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "backend,blob_size_bytes,operation,batch_size,trial,duration_ms,outcome\n"
        );
    }

    #[test]
    fn overwrites_existing_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(tempdir.path(), RunLabel::new("again"));

        writer
            .write(&[row("a", Operation::Write), row("b", Operation::Write)])
            .unwrap();
        let path = writer.write(&[row("c", Operation::Write)]).unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\nc,"));
    }

    #[test]
    fn round_trips_rows() {
        let tempdir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(tempdir.path(), RunLabel::new("rt"));
        let rows = vec![row("memory", Operation::BatchRead)];

        let path = writer.write(&rows).unwrap();
        let parsed: Vec<ResultRow> = csv::Reader::from_path(path)
            .unwrap()
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(parsed, rows);
    }

    #[test]
    fn writes_samples() {
        let tempdir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(tempdir.path(), RunLabel::new("raw"));
        let measurement = Measurement {
            backend: "memory".into(),
            blob_size: 1024,
            operation: Operation::Read,
            batch_size: 1,
            trial: 3,
            elapsed: Duration::from_micros(1500),
            outcome: Outcome::Failed(FailureKind::NotFound),
        };

        let path = writer.write_samples(&[measurement]).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            contents,
            "backend,blob_size_bytes,operation,batch_size,trial,duration_ms,outcome\n\
             memory,1024,read,1,3,1.5000,not_found\n"
        );
    }

    #[test]
    fn unwritable_directory() {
        let tempfile = tempfile::NamedTempFile::new().unwrap();
        let writer = ResultWriter::new(tempfile.path().join("sub"), RunLabel::new("x"));

        let err = writer.write(&[]).unwrap_err();
        assert!(matches!(err, WriterError::CreateDir { .. }));
    }
}
