//! The interface every storage backend implements.

use std::fmt::Debug;
use std::time::Duration;

use thiserror::Error;

use crate::blob::{Blob, BlobKey};
use crate::measurement::FailureKind;

/// Boxed error type carried as the source of an [`AdapterError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A type-erased [`SystemAdapter`] instance.
pub type BoxedAdapter = Box<dyn SystemAdapter>;

/// A type-erased [`Connection`] instance.
pub type BoxedConnection = Box<dyn Connection>;

/// Connects to one storage backend.
///
/// There is one implementation per backend. The adapter only holds connection parameters, the
/// live session is the [`Connection`] returned by [`connect`](SystemAdapter::connect).
#[async_trait::async_trait]
pub trait SystemAdapter: Debug + Send + Sync + 'static {
    /// The backend kind, used for diagnostics.
    fn kind(&self) -> &'static str;

    /// Establishes a session with the backend.
    ///
    /// Fails with [`AdapterError::Connection`] if the backend is unreachable or rejects the
    /// credentials.
    async fn connect(&self) -> AdapterResult<BoxedConnection>;
}

/// A live session with one backend.
///
/// Connections are owned exclusively by the runner and are never shared across backends.
#[async_trait::async_trait]
pub trait Connection: Debug + Send {
    /// Persists a single blob, addressable by its key.
    async fn write_one(&mut self, blob: &Blob) -> AdapterResult<()>;

    /// Retrieves a previously written blob.
    ///
    /// Fails with [`AdapterError::NotFound`] if nothing was stored under `key`.
    async fn read_one(&mut self, key: BlobKey) -> AdapterResult<Blob>;

    /// Persists all blobs as one logical operation.
    ///
    /// Backends with a bulk API use it, others write in a tight sequential loop.
    async fn write_batch(&mut self, blobs: &[Blob]) -> AdapterResult<()>;

    /// Retrieves all blobs for the given keys.
    ///
    /// The order of the result may differ from `keys`.
    async fn read_batch(&mut self, keys: &[BlobKey]) -> AdapterResult<Vec<Blob>>;

    /// Releases the session and removes benchmark data if configured to do so.
    ///
    /// Calling this more than once is not an error.
    async fn close(&mut self) -> AdapterResult<()>;
}

/// Errors raised by a [`SystemAdapter`] or its [`Connection`].
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The backend is unreachable or rejected the credentials.
    #[error("connection error: {context}")]
    Connection {
        /// What was being attempted.
        context: String,
        /// The underlying client error.
        #[source]
        cause: BoxError,
    },

    /// The backend rejected or failed a write.
    #[error("write error: {context}")]
    Write {
        /// What was being attempted.
        context: String,
        /// The underlying client error.
        #[source]
        cause: BoxError,
    },

    /// Transport or backend fault during a read.
    #[error("read error: {context}")]
    Read {
        /// What was being attempted.
        context: String,
        /// The underlying client error.
        #[source]
        cause: BoxError,
    },

    /// Nothing is stored under the requested key.
    #[error("blob {key} not found")]
    NotFound {
        /// The key that was requested.
        key: BlobKey,
    },

    /// The operation did not complete in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The configured timeout.
        timeout: Duration,
    },
}

impl AdapterError {
    /// Creates an [`AdapterError::Connection`].
    pub fn connection(context: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Connection {
            context: context.into(),
            cause: cause.into(),
        }
    }

    /// Creates an [`AdapterError::Write`].
    pub fn write(context: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Write {
            context: context.into(),
            cause: cause.into(),
        }
    }

    /// Creates an [`AdapterError::Read`].
    pub fn read(context: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Read {
            context: context.into(),
            cause: cause.into(),
        }
    }

    /// The failure kind recorded for a measurement that ended with this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection { .. } => FailureKind::Connection,
            Self::Write { .. } => FailureKind::Write,
            Self::Read { .. } => FailureKind::Read,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Timeout { .. } => FailureKind::Timeout,
        }
    }
}

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn keeps_source() {
        let err = AdapterError::write("put object", "status 507");
        assert_eq!(err.to_string(), "write error: put object");
        assert_eq!(err.source().unwrap().to_string(), "status 507");
        assert_eq!(err.kind(), FailureKind::Write);
    }

    #[test]
    fn not_found_kind() {
        let err = AdapterError::NotFound {
            key: BlobKey::new(12),
        };
        assert_eq!(err.to_string(), "blob 12 not found");
        assert_eq!(err.kind(), FailureKind::NotFound);
    }
}
