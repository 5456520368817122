//! Console summary after a run.

use std::fmt;

use blobbench_harness::{Report, ResultRow};
use bytesize::ByteSize;
use yansi::Paint;

/// Renders the results of a run per backend.
#[derive(Debug)]
pub struct Summary<'a> {
    report: &'a Report,
    rows: &'a [ResultRow],
}

impl<'a> Summary<'a> {
    pub fn new(report: &'a Report, rows: &'a [ResultRow]) -> Self {
        Self { report, rows }
    }
}

struct Millis(Option<f64>);

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ms) => write!(f, "{ms:.3} ms"),
            None => f.write_str("N/A"),
        }
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, row: &ResultRow) -> fmt::Result {
    write!(
        f,
        "  {:<12} {:>10}  ",
        row.operation.as_str().green(),
        ByteSize::b(row.blob_size_bytes).to_string()
    )?;

    if row.has_data() {
        write!(
            f,
            "avg: {}; p50: {}; p99: {}",
            Millis(row.mean_duration_ms).bold(),
            Millis(row.p50_duration_ms),
            Millis(row.p99_duration_ms),
        )?;
        if let Some(throughput) = row.throughput_mib_s {
            write!(f, "; {throughput:.2} MiB/s")?;
        }
    } else {
        write!(f, "{}", "no data".red())?;
    }

    write!(f, " ({} ops", row.trial_count)?;
    if row.failure_count > 0 {
        write!(
            f,
            ", {}",
            format!("{} FAILURES", row.failure_count).bold().red()
        )?;
    }
    writeln!(f, ")")
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "## Results".bold())?;
        for rows in self.rows.chunk_by(|a, b| a.backend == b.backend) {
            writeln!(f, "### {}", rows[0].backend.bold().blue())?;
            for row in rows {
                write_row(f, row)?;
            }
        }

        let failures = self.report.backend_failures();
        if !failures.is_empty() {
            writeln!(f, "{}", "## Unavailable backends".bold().red())?;
            for failure in failures {
                writeln!(f, "  {}: {}", failure.backend.bold(), failure.error)?;
            }
        }
        Ok(())
    }
}
