//! Randomized payloads and the keys used to address them.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Identifier of a blob within a benchmark run.
///
/// Keys are microsecond timestamps since the UNIX epoch, so time-series backends can use them
/// directly as the record time. Use a [`KeySource`] to hand out unique keys.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlobKey(u64);

impl BlobKey {
    /// Creates a key from a raw microsecond timestamp.
    pub const fn new(micros: u64) -> Self {
        Self(micros)
    }

    /// Returns the raw microsecond timestamp.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the timestamp in nanoseconds, as used by InfluxDB and Flux.
    pub const fn as_nanos(self) -> u128 {
        self.0 as u128 * 1000
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlobKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Hands out strictly increasing [`BlobKey`]s.
///
/// Keys follow the wall clock where possible, but never repeat even if many keys are requested
/// within the same microsecond or the clock jumps backwards.
#[derive(Debug)]
pub struct KeySource {
    last: Option<u64>,
}

impl KeySource {
    /// Creates a key source that follows the system clock.
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Returns the next unused key.
    pub fn next_key(&mut self) -> BlobKey {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();

        let next = match self.last {
            Some(last) => now.max(last + 1),
            None => now,
        };
        self.last = Some(next);
        BlobKey(next)
    }
}

impl Default for KeySource {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable payload of an exact size, addressed by its [`BlobKey`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Blob {
    key: BlobKey,
    data: Bytes,
}

impl Blob {
    /// Creates a blob from a key and its contents.
    pub fn new(key: BlobKey, data: impl Into<Bytes>) -> Self {
        Self {
            key,
            data: data.into(),
        }
    }

    /// The key under which this blob is written and read back.
    pub fn key(&self) -> BlobKey {
        self.key
    }

    /// The contents of the blob.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The size of the blob in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the blob has no contents.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Generates blobs filled with pseudo-random bytes.
///
/// Random contents keep backends from skewing results through compression or deduplication.
/// The generator is seeded, so two generators with the same seed produce identical blobs.
#[derive(Debug)]
pub struct BlobGenerator {
    rng: SmallRng,
}

impl BlobGenerator {
    /// Creates a generator with a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Creates a generator with a random seed.
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    /// Generates a blob of exactly `size` bytes, addressed by `key`.
    pub fn generate(&mut self, key: BlobKey, size: u64) -> Blob {
        let mut data = vec![0; size as usize];
        self.rng.fill_bytes(&mut data);
        Blob::new(key, data)
    }
}
