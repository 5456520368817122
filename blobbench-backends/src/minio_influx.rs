//! Blob store plus time-series index: payloads in MinIO, object names in InfluxDB.
//!
//! Every blob becomes an object named `{size_class}/{key}`. The name is written as a point into
//! InfluxDB at the blob's timestamp, and reads resolve the name through a Flux query before
//! fetching the object. S3 has no bulk put, so batch writes upload sequentially and then index
//! all names with one line-protocol request.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use blobbench_harness::adapter::BoxedConnection;
use blobbench_harness::{AdapterError, AdapterResult, Blob, BlobKey, Connection, SystemAdapter};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, BucketConfiguration, Region};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::common::DEFAULT_REQUEST_TIMEOUT;
use crate::influx::{InfluxClient, InfluxConfig};
use crate::secret::Secret;

/// Connection parameters for MinIO.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MinioConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key: Option<Secret>,
    pub secret_key: Option<Secret>,
    /// Bucket to store objects in. Created on connect if missing.
    pub bucket: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for MinioConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            access_key: None,
            secret_key: None,
            bucket: "blobbench".into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Configuration of the MinIO and InfluxDB pairing.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MinioInfluxConfig {
    pub minio: MinioConfig,
    pub influx: InfluxConfig,
    /// Remove written objects and index points when the connection is closed.
    pub cleanup: bool,
}

impl Default for MinioInfluxConfig {
    fn default() -> Self {
        Self {
            minio: MinioConfig::default(),
            influx: InfluxConfig::default(),
            cleanup: true,
        }
    }
}

/// [`SystemAdapter`] pairing MinIO with InfluxDB.
#[derive(Debug)]
pub struct MinioInfluxAdapter {
    config: MinioInfluxConfig,
}

impl MinioInfluxAdapter {
    pub fn new(config: MinioInfluxConfig) -> Self {
        Self { config }
    }

    fn bucket(&self) -> Result<(Box<Bucket>, Region, Credentials), S3Error> {
        let config = &self.config.minio;
        let credentials = match &config.access_key {
            Some(access_key) => Credentials::new(
                Some(access_key.expose_secret().as_str()),
                config.secret_key.as_ref().map(|key| key.expose_secret().as_str()),
                None,
                None,
                None,
            )?,
            None => Credentials::anonymous()?,
        };
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let bucket = Bucket::new(&config.bucket, region.clone(), credentials.clone())?
            .with_path_style()
            .with_request_timeout(config.request_timeout)?;
        Ok((bucket, region, credentials))
    }
}

#[async_trait::async_trait]
impl SystemAdapter for MinioInfluxAdapter {
    fn kind(&self) -> &'static str {
        "minio_influx"
    }

    async fn connect(&self) -> AdapterResult<BoxedConnection> {
        let name = &self.config.minio.bucket;
        let (bucket, region, credentials) = self
            .bucket()
            .map_err(|e| AdapterError::connection("configure minio bucket", e))?;

        let exists = bucket
            .exists()
            .await
            .map_err(|e| AdapterError::connection(format!("HEAD bucket {name}"), e))?;

        if !exists {
            let response = Bucket::create_with_path_style(
                name,
                region,
                credentials,
                BucketConfiguration::default(),
            )
            .await
            .map_err(|e| AdapterError::connection(format!("create bucket {name}"), e))?;

            if !response.success() {
                return Err(AdapterError::connection(
                    format!("create bucket {name}"),
                    format!("status {}", response.response_code),
                ));
            }
            tracing::debug!(bucket = %name, "created minio bucket");
        }

        let influx = InfluxClient::new(&self.config.influx)?;
        influx.ping().await?;
        influx.ensure_bucket().await?;

        Ok(Box::new(MinioInfluxConnection {
            bucket,
            influx,
            written: BTreeMap::new(),
            created_bucket: !exists,
            cleanup: self.config.cleanup,
            closed: false,
        }))
    }
}

struct MinioInfluxConnection {
    bucket: Box<Bucket>,
    influx: InfluxClient,
    /// Object names of everything written through this connection.
    written: BTreeMap<BlobKey, String>,
    created_bucket: bool,
    cleanup: bool,
    closed: bool,
}

impl fmt::Debug for MinioInfluxConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinioInfluxConnection")
            .field("bucket", &self.bucket.name())
            .field("endpoint", &self.bucket.host())
            .field("influx", &self.influx)
            .field("written", &self.written.len())
            .finish_non_exhaustive()
    }
}

impl MinioInfluxConnection {
    async fn put(&self, name: &str, blob: &Blob) -> AdapterResult<()> {
        let context = format!("PUT {name}");
        let response = self
            .bucket
            .put_object(name, blob.data())
            .await
            .map_err(|e| AdapterError::write(&context, e))?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(AdapterError::write(context, format!("status {status}")));
        }
        Ok(())
    }

    async fn get(&self, key: BlobKey, name: &str) -> AdapterResult<Blob> {
        let context = format!("GET {name}");
        match self.bucket.get_object(name).await {
            Ok(response) if response.status_code() == 404 => Err(AdapterError::NotFound { key }),
            Ok(response) if !(200..300).contains(&response.status_code()) => Err(
                AdapterError::read(context, format!("status {}", response.status_code())),
            ),
            Ok(response) => Ok(Blob::new(key, response.to_vec())),
            Err(S3Error::HttpFailWithBody(404, _)) => Err(AdapterError::NotFound { key }),
            Err(e) => Err(AdapterError::read(context, e)),
        }
    }

    /// The size class shared by all keys, if every key was written through this connection.
    fn common_size_class(&self, keys: &[BlobKey]) -> Option<u64> {
        let mut classes = keys
            .iter()
            .map(|key| self.written.get(key).and_then(|name| parse_object_name(name)));
        let first = classes.next().flatten()?.0;
        classes
            .all(|class| class.is_some_and(|(size, _)| size == first))
            .then_some(first)
    }

    async fn remove_objects(&self) -> AdapterResult<()> {
        let mut result = Ok(());
        for name in self.written.values() {
            if let Err(error) = self.bucket.delete_object(name).await {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    object = %name,
                    "failed to remove object"
                );
                result = Err(AdapterError::connection(format!("DELETE {name}"), error));
            }
        }

        if self.created_bucket {
            self.bucket
                .delete()
                .await
                .map_err(|e| AdapterError::connection("delete bucket", e))?;
        }
        result
    }
}

#[async_trait::async_trait]
impl Connection for MinioInfluxConnection {
    async fn write_one(&mut self, blob: &Blob) -> AdapterResult<()> {
        let size = blob.len() as u64;
        let name = object_name(size, blob.key());

        self.put(&name, blob).await?;
        self.written.insert(blob.key(), name.clone());
        self.influx.index(&[(blob.key(), size, &name)]).await
    }

    async fn read_one(&mut self, key: BlobKey) -> AdapterResult<Blob> {
        let names = self.influx.lookup(key, key, None).await?;
        let Some(name) = names.into_iter().next() else {
            return Err(AdapterError::NotFound { key });
        };
        self.get(key, &name).await
    }

    async fn write_batch(&mut self, blobs: &[Blob]) -> AdapterResult<()> {
        let mut names = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let name = object_name(blob.len() as u64, blob.key());
            self.put(&name, blob).await?;
            self.written.insert(blob.key(), name.clone());
            names.push(name);
        }

        let entries: Vec<_> = blobs
            .iter()
            .zip(&names)
            .map(|(blob, name)| (blob.key(), blob.len() as u64, name.as_str()))
            .collect();
        self.influx.index(&entries).await
    }

    async fn read_batch(&mut self, keys: &[BlobKey]) -> AdapterResult<Vec<Blob>> {
        let (Some(&start), Some(&end)) = (keys.iter().min(), keys.iter().max()) else {
            return Ok(Vec::new());
        };

        let size_class = self.common_size_class(keys);
        let names = self.influx.lookup(start, end, size_class).await?;

        let wanted: HashSet<BlobKey> = keys.iter().copied().collect();
        let mut blobs = Vec::with_capacity(keys.len());
        for name in names {
            let Some((_, key)) = parse_object_name(&name) else {
                tracing::debug!(object = %name, "skipping foreign index entry");
                continue;
            };
            if !wanted.contains(&key) {
                continue;
            }
            match self.get(key, &name).await {
                Ok(blob) => blobs.push(blob),
                Err(AdapterError::NotFound { .. }) => continue,
                Err(error) => return Err(error),
            }
        }
        Ok(blobs)
    }

    async fn close(&mut self) -> AdapterResult<()> {
        if std::mem::replace(&mut self.closed, true) || !self.cleanup {
            return Ok(());
        }

        let objects = self.remove_objects().await;
        if let (Some(&start), Some(&end)) = (self.written.keys().next(), self.written.keys().last())
        {
            self.influx.delete(start, end).await?;
        }
        self.written.clear();
        objects
    }
}

fn object_name(size_class: u64, key: BlobKey) -> String {
    format!("{size_class}/{key}")
}

fn parse_object_name(name: &str) -> Option<(u64, BlobKey)> {
    let (size, key) = name.split_once('/')?;
    Some((size.parse().ok()?, BlobKey::new(key.parse().ok()?)))
}

#[cfg(test)]
mod tests {
    use std::net::{SocketAddr, TcpListener};
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::http::{Method, StatusCode, Uri, header};

    use super::*;

    /// Answers every request with `200 OK`, except paths under `failing` which get a `500`.
    ///
    /// Stands in for both MinIO and InfluxDB and records all requests it receives.
    struct StubServer {
        handle: tokio::task::JoinHandle<()>,
        socket: SocketAddr,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl StubServer {
        fn start(failing: &'static str) -> Self {
            let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
            listener.set_nonblocking(true).unwrap();
            let socket = listener.local_addr().unwrap();

            let requests = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&requests);
            let app = Router::new().fallback(move |method: Method, uri: Uri| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("{method} {}", uri.path()));
                    let status = if uri.path().starts_with(failing) {
                        StatusCode::INTERNAL_SERVER_ERROR
                    } else {
                        StatusCode::OK
                    };
                    (status, [(header::ETAG, "\"d41d8cd98f00b204e9800998ecf8427e\"")])
                }
            });

            let handle = tokio::spawn(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                handle,
                socket,
                requests,
            }
        }

        fn url(&self) -> String {
            format!("http://127.0.0.1:{}", self.socket.port())
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Drop for StubServer {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    fn connection(server: &StubServer) -> MinioInfluxConnection {
        let config = MinioInfluxConfig {
            minio: MinioConfig {
                endpoint: server.url(),
                ..Default::default()
            },
            influx: InfluxConfig {
                url: server.url(),
                ..Default::default()
            },
            cleanup: true,
        };
        let adapter = MinioInfluxAdapter::new(config);
        let (bucket, _, _) = adapter.bucket().unwrap();

        MinioInfluxConnection {
            bucket,
            influx: InfluxClient::new(&adapter.config.influx).unwrap(),
            written: BTreeMap::new(),
            created_bucket: false,
            cleanup: true,
            closed: false,
        }
    }

    #[tokio::test]
    async fn close_removes_objects_after_failed_index() {
        let server = StubServer::start("/api/v2/write");
        let mut conn = connection(&server);
        let key = BlobKey::new(1_700_000_000_000_000);

        let err = conn
            .write_one(&Blob::new(key, &b"payload"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Write { .. }));
        assert_eq!(
            conn.written.get(&key).map(String::as_str),
            Some("7/1700000000000000")
        );

        conn.close().await.unwrap();
        let requests = server.requests();
        assert!(requests.contains(&"PUT /blobbench/7/1700000000000000".to_owned()));
        assert!(requests.contains(&"DELETE /blobbench/7/1700000000000000".to_owned()));
        assert!(requests.contains(&"POST /api/v2/delete".to_owned()));
    }

    #[test]
    fn object_names() {
        let key = BlobKey::new(1_700_000_000_000_000);
        let name = object_name(1024, key);

        assert_eq!(name, "1024/1700000000000000");
        assert_eq!(parse_object_name(&name), Some((1024, key)));
        assert_eq!(parse_object_name("1024"), None);
        assert_eq!(parse_object_name("a/b"), None);
    }

    #[test]
    fn config_from_nested_sections() {
        let config: MinioInfluxConfig = serde_json::from_str(
            r#"{
                "minio": {"endpoint": "http://minio:9000", "bucket": "blobs"},
                "influx": {"org": "bench", "request_timeout": "5s"},
                "cleanup": false
            }"#,
        )
        .unwrap();

        assert_eq!(config.minio.endpoint, "http://minio:9000");
        assert_eq!(config.minio.region, "us-east-1");
        assert_eq!(config.influx.org, "bench");
        assert_eq!(config.influx.request_timeout, Duration::from_secs(5));
        assert!(!config.cleanup);
    }

    #[test]
    fn builds_path_style_bucket() {
        let adapter = MinioInfluxAdapter::new(MinioInfluxConfig::default());
        let (bucket, _, _) = adapter.bucket().unwrap();
        assert_eq!(bucket.name(), "blobbench");
    }
}
