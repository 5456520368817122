//! Storage backends for the benchmark harness.
//!
//! Each module implements [`SystemAdapter`] for one kind of storage system:
//!
//! - [`reductstore`]: an object store for time-series blobs, over HTTP,
//! - [`minio_influx`]: MinIO objects indexed by name in InfluxDB,
//! - [`timescale`]: rows in a TimescaleDB hypertable,
//! - [`mongo`]: documents in a MongoDB collection.
//!
//! Backends are described by a [`BackendConfig`], which is usually deserialized from the
//! `backends` section of the configuration file, and instantiated with [`build_adapter`].
#![warn(missing_debug_implementations)]

use blobbench_harness::{BoxedAdapter, InMemoryAdapter, MemoryConfig};
use serde::{Deserialize, Serialize};

pub mod common;
mod influx;
pub mod minio_influx;
pub mod mongo;
pub mod reductstore;
pub mod secret;
pub mod timescale;

pub use influx::InfluxConfig;
pub use minio_influx::{MinioConfig, MinioInfluxAdapter, MinioInfluxConfig};
pub use mongo::{MongoAdapter, MongoConfig};
pub use reductstore::{ReductStoreAdapter, ReductStoreConfig};
pub use secret::{ConfigSecret, Secret};
pub use timescale::{TimescaleAdapter, TimescaleConfig};

/// Configuration of one backend, selected by its `type`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum BackendConfig {
    /// ReductStore object store.
    #[serde(rename = "reductstore")]
    ReductStore(ReductStoreConfig),
    /// MinIO for payloads, InfluxDB for the index.
    #[serde(rename = "minio_influx")]
    MinioInflux(MinioInfluxConfig),
    /// TimescaleDB hypertable.
    #[serde(rename = "timescale")]
    Timescale(TimescaleConfig),
    /// MongoDB collection.
    #[serde(rename = "mongodb")]
    MongoDb(MongoConfig),
    /// In-process store with simulated latency.
    #[serde(rename = "memory")]
    Memory(MemoryConfig),
}

impl BackendConfig {
    /// The `type` tag of this configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReductStore(_) => "reductstore",
            Self::MinioInflux(_) => "minio_influx",
            Self::Timescale(_) => "timescale",
            Self::MongoDb(_) => "mongodb",
            Self::Memory(_) => "memory",
        }
    }
}

/// Creates the adapter for a backend configuration.
///
/// This does not contact the backend, connections are established by the runner.
pub fn build_adapter(config: &BackendConfig) -> BoxedAdapter {
    match config {
        BackendConfig::ReductStore(c) => Box::new(ReductStoreAdapter::new(c.clone())),
        BackendConfig::MinioInflux(c) => Box::new(MinioInfluxAdapter::new(c.clone())),
        BackendConfig::Timescale(c) => Box::new(TimescaleAdapter::new(c.clone())),
        BackendConfig::MongoDb(c) => Box::new(MongoAdapter::new(c.clone())),
        BackendConfig::Memory(c) => Box::new(InMemoryAdapter::new(c.clone())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn deserializes_tagged_configs() {
        let configs: Vec<BackendConfig> = serde_json::from_str(
            r#"[
                {"type": "reductstore", "url": "http://reduct:8383", "token": "secret"},
                {"type": "minio_influx", "minio": {"bucket": "objects"}},
                {"type": "timescale", "table": "bench"},
                {"type": "mongodb"},
                {"type": "memory", "write_latency": "2ms", "fail_every_nth_write": 5}
            ]"#,
        )
        .unwrap();

        let kinds: Vec<_> = configs.iter().map(BackendConfig::kind).collect();
        assert_eq!(
            kinds,
            ["reductstore", "minio_influx", "timescale", "mongodb", "memory"]
        );

        let BackendConfig::ReductStore(reduct) = &configs[0] else {
            panic!("expected reductstore");
        };
        assert_eq!(reduct.url, "http://reduct:8383");
        assert_eq!(reduct.token.as_ref().unwrap().expose_secret().as_str(), "secret");

        let BackendConfig::Memory(memory) = &configs[4] else {
            panic!("expected memory");
        };
        assert_eq!(memory.write_latency, Duration::from_millis(2));
        assert_eq!(memory.fail_every_nth_write, Some(5));
    }

    #[test]
    fn rejects_unknown_type() {
        let result = serde_json::from_str::<BackendConfig>(r#"{"type": "cassandra"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn builds_adapters() {
        let configs = [
            BackendConfig::ReductStore(Default::default()),
            BackendConfig::MinioInflux(Default::default()),
            BackendConfig::Timescale(Default::default()),
            BackendConfig::MongoDb(Default::default()),
            BackendConfig::Memory(Default::default()),
        ];

        for config in &configs {
            assert_eq!(build_adapter(config).kind(), config.kind());
        }
    }
}
