//! Document database backend storing every blob as one MongoDB document.

use std::time::Duration;

use blobbench_harness::adapter::BoxedConnection;
use blobbench_harness::{AdapterError, AdapterResult, Blob, BlobKey, Connection, SystemAdapter};
use futures_util::TryStreamExt;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{Binary, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, IndexModel};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::common::DEFAULT_REQUEST_TIMEOUT;
use crate::secret::{Secret, secret};

/// Connection parameters for MongoDB.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MongoConfig {
    /// Connection string, may include credentials.
    pub uri: Secret,
    pub database: String,
    pub collection: String,
    /// Timeout for connecting and selecting a server.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Drop the collection when the connection is closed.
    pub cleanup: bool,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: secret("mongodb://localhost:27017"),
            database: "blobbench".into(),
            collection: "blobs".into(),
            connect_timeout: DEFAULT_REQUEST_TIMEOUT,
            cleanup: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct BlobDocument {
    key: i64,
    size_class: i64,
    payload: Binary,
}

impl From<&Blob> for BlobDocument {
    fn from(blob: &Blob) -> Self {
        Self {
            key: blob.key().as_u64() as i64,
            size_class: blob.len() as i64,
            payload: Binary {
                subtype: BinarySubtype::Generic,
                bytes: blob.data().to_vec(),
            },
        }
    }
}

impl From<BlobDocument> for Blob {
    fn from(document: BlobDocument) -> Self {
        Blob::new(BlobKey::new(document.key as u64), document.payload.bytes)
    }
}

/// [`SystemAdapter`] for MongoDB.
#[derive(Debug)]
pub struct MongoAdapter {
    config: MongoConfig,
}

impl MongoAdapter {
    pub fn new(config: MongoConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl SystemAdapter for MongoAdapter {
    fn kind(&self) -> &'static str {
        "mongodb"
    }

    async fn connect(&self) -> AdapterResult<BoxedConnection> {
        let mut options = ClientOptions::parse(self.config.uri.expose_secret().as_str())
            .await
            .map_err(|e| AdapterError::connection("parse connection string", e))?;
        options.app_name = Some("blobbench".into());
        options.connect_timeout = Some(self.config.connect_timeout);
        options.server_selection_timeout = Some(self.config.connect_timeout);

        let client = Client::with_options(options)
            .map_err(|e| AdapterError::connection("create client", e))?;
        let database = client.database(&self.config.database);

        // the driver connects lazily, so ping to surface unreachable servers here
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AdapterError::connection("ping", e))?;

        let collection: Collection<BlobDocument> = database.collection(&self.config.collection);
        collection
            .create_index(IndexModel::builder().keys(doc! { "key": 1 }).build())
            .await
            .map_err(|e| AdapterError::connection("create index on key", e))?;

        Ok(Box::new(MongoConnection {
            client,
            collection,
            cleanup: self.config.cleanup,
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct MongoConnection {
    client: Client,
    collection: Collection<BlobDocument>,
    cleanup: bool,
    closed: bool,
}

#[async_trait::async_trait]
impl Connection for MongoConnection {
    async fn write_one(&mut self, blob: &Blob) -> AdapterResult<()> {
        self.collection
            .insert_one(BlobDocument::from(blob))
            .await
            .map_err(|e| AdapterError::write(format!("insert blob {}", blob.key()), e))?;
        Ok(())
    }

    async fn read_one(&mut self, key: BlobKey) -> AdapterResult<Blob> {
        let document = self
            .collection
            .find_one(doc! { "key": key.as_u64() as i64 })
            .await
            .map_err(|e| AdapterError::read(format!("find blob {key}"), e))?;

        document
            .map(Blob::from)
            .ok_or(AdapterError::NotFound { key })
    }

    async fn write_batch(&mut self, blobs: &[Blob]) -> AdapterResult<()> {
        if blobs.is_empty() {
            return Ok(());
        }

        self.collection
            .insert_many(blobs.iter().map(BlobDocument::from))
            .await
            .map_err(|e| AdapterError::write(format!("insert {} blobs", blobs.len()), e))?;
        Ok(())
    }

    async fn read_batch(&mut self, keys: &[BlobKey]) -> AdapterResult<Vec<Blob>> {
        let context = format!("find {} blobs", keys.len());
        let keys: Vec<i64> = keys.iter().map(|key| key.as_u64() as i64).collect();

        let cursor = self
            .collection
            .find(doc! { "key": { "$in": keys } })
            .await
            .map_err(|e| AdapterError::read(&context, e))?;
        let documents: Vec<BlobDocument> = cursor
            .try_collect()
            .await
            .map_err(|e| AdapterError::read(&context, e))?;

        Ok(documents.into_iter().map(Blob::from).collect())
    }

    async fn close(&mut self) -> AdapterResult<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        let dropped = if self.cleanup {
            self.collection
                .drop()
                .await
                .map_err(|e| AdapterError::connection("drop collection", e))
        } else {
            Ok(())
        };

        self.client.clone().shutdown().await;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson;

    use super::*;

    #[test]
    fn maps_blob_to_document() {
        let blob = Blob::new(BlobKey::new(42), &b"oh hai!"[..]);
        let document = bson::to_document(&BlobDocument::from(&blob)).unwrap();

        assert_eq!(document.get_i64("key").unwrap(), 42);
        assert_eq!(document.get_i64("size_class").unwrap(), 7);
        assert_eq!(
            document.get_binary_generic("payload").unwrap().as_slice(),
            b"oh hai!"
        );
    }

    #[test]
    fn maps_document_to_blob() {
        let document = BlobDocument {
            key: 7,
            size_class: 3,
            payload: Binary {
                subtype: BinarySubtype::Generic,
                bytes: b"abc".to_vec(),
            },
        };

        let blob = Blob::from(document);
        assert_eq!(blob.key(), BlobKey::new(7));
        assert_eq!(blob.data().as_ref(), b"abc");
    }

    #[test]
    fn config_defaults() {
        let config: MongoConfig = serde_json::from_str(r#"{"collection": "bench"}"#).unwrap();
        assert_eq!(config.database, "blobbench");
        assert_eq!(config.collection, "bench");
        assert!(!format!("{config:?}").contains("27017"));
    }
}
