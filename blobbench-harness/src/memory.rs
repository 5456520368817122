//! In-memory adapter for tests and smoke runs.
//!
//! This provides a [`SystemAdapter`] backed by a `HashMap`, with configurable simulated latency
//! and deterministic fault injection. The adapter is [`Clone`] and all connections share the same
//! store, so tests can hold a handle for direct inspection while the runner owns a boxed copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterError, AdapterResult, BoxedConnection, Connection, SystemAdapter};
use crate::blob::{Blob, BlobKey};

type Store = HashMap<BlobKey, Bytes>;

/// Behavior of an [`InMemoryAdapter`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Simulated latency of a single write.
    #[serde(with = "humantime_serde")]
    pub write_latency: Duration,
    /// Simulated latency of a single read.
    #[serde(with = "humantime_serde")]
    pub read_latency: Duration,
    /// Simulated latency of a batch write.
    #[serde(with = "humantime_serde")]
    pub batch_write_latency: Duration,
    /// Simulated latency of a batch read.
    #[serde(with = "humantime_serde")]
    pub batch_read_latency: Duration,
    /// Reject every connection attempt.
    pub fail_connect: bool,
    /// Fail every n-th single write, counted per connection.
    pub fail_every_nth_write: Option<u32>,
    /// Fail every n-th single read, counted per connection.
    pub fail_every_nth_read: Option<u32>,
    /// Fail every batch write.
    pub fail_batch_write: bool,
    /// Fail every batch read.
    pub fail_batch_read: bool,
    /// Flip the first byte of every blob returned from a read.
    pub corrupt_reads: bool,
}

/// A [`SystemAdapter`] storing blobs in process memory.
#[derive(Debug, Clone)]
pub struct InMemoryAdapter {
    config: MemoryConfig,
    store: Arc<Mutex<Store>>,
}

impl InMemoryAdapter {
    /// Creates an adapter with the given behavior and an empty store.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the number of stored blobs.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Returns `true` if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().is_empty()
    }

    /// Returns `true` if a blob is stored under `key`.
    pub fn contains(&self, key: BlobKey) -> bool {
        self.store.lock().unwrap().contains_key(&key)
    }
}

#[async_trait::async_trait]
impl SystemAdapter for InMemoryAdapter {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> AdapterResult<BoxedConnection> {
        if self.config.fail_connect {
            return Err(AdapterError::connection(
                "connect to in-memory store",
                "connection refused",
            ));
        }

        Ok(Box::new(InMemoryConnection {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            writes: 0,
            reads: 0,
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct InMemoryConnection {
    config: MemoryConfig,
    store: Arc<Mutex<Store>>,
    writes: u32,
    reads: u32,
    closed: bool,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> AdapterResult<()> {
        if self.closed {
            return Err(AdapterError::connection(
                "use in-memory connection",
                "connection already closed",
            ));
        }
        Ok(())
    }

    fn load(&self, key: BlobKey) -> Option<Blob> {
        let data = self.store.lock().unwrap().get(&key).cloned()?;
        if self.config.corrupt_reads && !data.is_empty() {
            let mut corrupted = data.to_vec();
            corrupted[0] ^= 0xff;
            return Some(Blob::new(key, corrupted));
        }
        Some(Blob::new(key, data))
    }
}

fn is_nth(counter: u32, every: Option<u32>) -> bool {
    matches!(every, Some(n) if n > 0 && counter % n == 0)
}

#[async_trait::async_trait]
impl Connection for InMemoryConnection {
    async fn write_one(&mut self, blob: &Blob) -> AdapterResult<()> {
        self.ensure_open()?;
        tokio::time::sleep(self.config.write_latency).await;

        self.writes += 1;
        if is_nth(self.writes, self.config.fail_every_nth_write) {
            return Err(AdapterError::write(
                format!("store blob {}", blob.key()),
                "injected write fault",
            ));
        }

        self.store
            .lock()
            .unwrap()
            .insert(blob.key(), blob.data().clone());
        Ok(())
    }

    async fn read_one(&mut self, key: BlobKey) -> AdapterResult<Blob> {
        self.ensure_open()?;
        tokio::time::sleep(self.config.read_latency).await;

        self.reads += 1;
        if is_nth(self.reads, self.config.fail_every_nth_read) {
            return Err(AdapterError::read(
                format!("load blob {key}"),
                "injected read fault",
            ));
        }

        self.load(key).ok_or(AdapterError::NotFound { key })
    }

    async fn write_batch(&mut self, blobs: &[Blob]) -> AdapterResult<()> {
        self.ensure_open()?;
        tokio::time::sleep(self.config.batch_write_latency).await;

        if self.config.fail_batch_write {
            return Err(AdapterError::write(
                format!("store batch of {} blobs", blobs.len()),
                "injected write fault",
            ));
        }

        let mut store = self.store.lock().unwrap();
        for blob in blobs {
            store.insert(blob.key(), blob.data().clone());
        }
        Ok(())
    }

    async fn read_batch(&mut self, keys: &[BlobKey]) -> AdapterResult<Vec<Blob>> {
        self.ensure_open()?;
        tokio::time::sleep(self.config.batch_read_latency).await;

        if self.config.fail_batch_read {
            return Err(AdapterError::read(
                format!("load batch of {} blobs", keys.len()),
                "injected read fault",
            ));
        }

        Ok(keys.iter().filter_map(|key| self.load(*key)).collect())
    }

    async fn close(&mut self) -> AdapterResult<()> {
        self.closed = true;
        Ok(())
    }
}
