//! Individual timing observations.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The kind of operation a [`Measurement`] was taken for.
///
/// The declaration order is the order of rows in the output.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A single blob write.
    Write,
    /// A single blob read.
    Read,
    /// A write covering a whole batch.
    BatchWrite,
    /// A read covering a whole batch.
    BatchRead,
}

impl Operation {
    /// All operations in output order.
    pub const ALL: [Operation; 4] = [
        Operation::Write,
        Operation::Read,
        Operation::BatchWrite,
        Operation::BatchRead,
    ];

    /// The name used in CSV output and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::BatchWrite => "batch_write",
            Operation::BatchRead => "batch_read",
        }
    }

    /// The number of blobs one operation covers for the given batch size.
    pub const fn blobs_per_op(self, batch_size: usize) -> usize {
        match self {
            Operation::Write | Operation::Read => 1,
            Operation::BatchWrite | Operation::BatchRead => batch_size,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown operation `{s}`"))
    }
}

/// Why a measured operation counts as failed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FailureKind {
    /// The session broke down during the operation.
    Connection,
    /// The backend rejected or failed a write.
    Write,
    /// Transport or backend fault during a read.
    Read,
    /// A read for a key that was never stored, usually after a failed write.
    NotFound,
    /// The call exceeded the per-operation timeout.
    Timeout,
    /// A read returned different bytes than were written.
    Mismatch,
    /// A batch read returned a different number of blobs than requested.
    Cardinality,
}

impl FailureKind {
    /// The name used in CSV output and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureKind::Connection => "connection",
            FailureKind::Write => "write",
            FailureKind::Read => "read",
            FailureKind::NotFound => "not_found",
            FailureKind::Timeout => "timeout",
            FailureKind::Mismatch => "mismatch",
            FailureKind::Cardinality => "cardinality",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a measured operation succeeded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The operation completed and its result checked out.
    Success,
    /// The operation failed. The duration is kept but excluded from statistics.
    Failed(FailureKind),
}

impl Outcome {
    /// Returns `true` for [`Outcome::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("ok"),
            Outcome::Failed(kind) => kind.fmt(f),
        }
    }
}

/// One observed duration for one operation against one (backend, blob size) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    /// The name of the backend.
    pub backend: String,
    /// The size of each blob in bytes.
    pub blob_size: u64,
    /// The operation that was timed.
    pub operation: Operation,
    /// How many blobs the operation covered.
    pub batch_size: usize,
    /// Zero-based index of the trial or batch repetition within its pair.
    pub trial: usize,
    /// Wall-clock duration of the call.
    pub elapsed: Duration,
    /// Whether the call succeeded.
    pub outcome: Outcome,
}
