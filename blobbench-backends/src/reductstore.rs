//! Object-store backend talking to ReductStore over its HTTP API.
//!
//! Blobs are records in one entry of a bucket, timestamped with their [`BlobKey`]. The size class
//! is attached as the `size_class` label. Batches use the native batch endpoints, so a batch write
//! and every page of a batch read is a single HTTP request.

use std::collections::HashSet;
use std::time::Duration;

use blobbench_harness::adapter::BoxedConnection;
use blobbench_harness::{AdapterError, AdapterResult, Blob, BlobKey, Connection, SystemAdapter};
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::common::{self, DEFAULT_REQUEST_TIMEOUT, describe_failure, is_auth_failure};
use crate::secret::Secret;

const CONTENT_TYPE_BLOB: &str = "application/octet-stream";
const TIME_HEADER_PREFIX: &str = "x-reduct-time-";
const ERROR_HEADER_PREFIX: &str = "x-reduct-error-";
const LAST_HEADER: &str = "x-reduct-last";
const SIZE_CLASS_LABEL: &str = "x-reduct-label-size_class";

/// Connection parameters for ReductStore.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ReductStoreConfig {
    /// Base URL of the server.
    pub url: String,
    /// API token, sent as a bearer token.
    pub token: Option<Secret>,
    /// Bucket to store records in. Created on connect if missing.
    pub bucket: String,
    /// Entry within the bucket.
    pub entry: String,
    /// Timeout for each HTTP request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Remove the bucket when the connection is closed.
    pub cleanup: bool,
}

impl Default for ReductStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8383".into(),
            token: None,
            bucket: "blobbench".into(),
            entry: "blobs".into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cleanup: true,
        }
    }
}

/// [`SystemAdapter`] for ReductStore.
#[derive(Debug)]
pub struct ReductStoreAdapter {
    config: ReductStoreConfig,
}

impl ReductStoreAdapter {
    pub fn new(config: ReductStoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl SystemAdapter for ReductStoreAdapter {
    fn kind(&self) -> &'static str {
        "reductstore"
    }

    async fn connect(&self) -> AdapterResult<BoxedConnection> {
        let client = ReductClient {
            http: common::reqwest_client(self.config.request_timeout)?,
            base: self.config.url.trim_end_matches('/').to_owned(),
            token: self.config.token.clone(),
        };

        let context = "GET /api/v1/info";
        let response = client
            .request(Method::GET, "/api/v1/info")
            .send()
            .await
            .map_err(|e| AdapterError::connection(context, e))?;
        if !response.status().is_success() {
            return Err(AdapterError::connection(
                context,
                describe_failure(response).await,
            ));
        }

        let bucket_path = format!("/api/v1/b/{}", self.config.bucket);
        let context = format!("POST {bucket_path}");
        let response = client
            .request(Method::POST, &bucket_path)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| AdapterError::connection(&context, e))?;
        match response.status() {
            status if status.is_success() => {
                tracing::debug!(bucket = %self.config.bucket, "created bucket")
            }
            StatusCode::CONFLICT => {
                tracing::debug!(bucket = %self.config.bucket, "bucket already exists")
            }
            _ => {
                return Err(AdapterError::connection(
                    context,
                    describe_failure(response).await,
                ));
            }
        }

        Ok(Box::new(ReductStoreConnection {
            entry_path: format!("{bucket_path}/{}", self.config.entry),
            bucket_path,
            client,
            cleanup: self.config.cleanup,
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct ReductClient {
    http: reqwest::Client,
    base: String,
    token: Option<Secret>,
}

impl ReductClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base));
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret().as_str()),
            None => builder,
        }
    }
}

#[derive(Debug)]
struct ReductStoreConnection {
    client: ReductClient,
    bucket_path: String,
    entry_path: String,
    cleanup: bool,
    closed: bool,
}

impl ReductStoreConnection {
    async fn query(&self, start: u64, stop: u64) -> AdapterResult<u64> {
        #[derive(Deserialize)]
        struct QueryInfo {
            id: u64,
        }

        let context = format!("GET {}/q", self.entry_path);
        let response = self
            .client
            .request(Method::GET, &format!("{}/q", self.entry_path))
            .query(&[("start", start), ("stop", stop)])
            .send()
            .await
            .map_err(|e| AdapterError::read(&context, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::read(context, describe_failure(response).await));
        }

        let info: QueryInfo = response
            .json()
            .await
            .map_err(|e| AdapterError::read(context, e))?;
        Ok(info.id)
    }
}

#[async_trait::async_trait]
impl Connection for ReductStoreConnection {
    async fn write_one(&mut self, blob: &Blob) -> AdapterResult<()> {
        let context = format!("POST {}?ts={}", self.entry_path, blob.key());
        let response = self
            .client
            .request(Method::POST, &self.entry_path)
            .query(&[("ts", blob.key().as_u64())])
            .header(CONTENT_TYPE, CONTENT_TYPE_BLOB)
            .header(SIZE_CLASS_LABEL, blob.len())
            .body(blob.data().clone())
            .send()
            .await
            .map_err(|e| AdapterError::write(&context, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::write(context, describe_failure(response).await));
        }
        Ok(())
    }

    async fn read_one(&mut self, key: BlobKey) -> AdapterResult<Blob> {
        let context = format!("GET {}?ts={key}", self.entry_path);
        let response = self
            .client
            .request(Method::GET, &self.entry_path)
            .query(&[("ts", key.as_u64())])
            .send()
            .await
            .map_err(|e| AdapterError::read(&context, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(AdapterError::NotFound { key }),
            status if !status.is_success() => {
                return Err(AdapterError::read(context, describe_failure(response).await));
            }
            _ => {}
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| AdapterError::read(context, e))?;
        Ok(Blob::new(key, data))
    }

    async fn write_batch(&mut self, blobs: &[Blob]) -> AdapterResult<()> {
        let mut sorted: Vec<&Blob> = blobs.iter().collect();
        sorted.sort_by_key(|blob| blob.key());

        let path = format!("{}/batch", self.entry_path);
        let context = format!("POST {path}");
        let body: Vec<u8> = sorted.iter().flat_map(|blob| blob.data().iter().copied()).collect();

        let mut request = self
            .client
            .request(Method::POST, &path)
            .header(CONTENT_TYPE, CONTENT_TYPE_BLOB);
        for (name, value) in batch_write_headers(&sorted) {
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| AdapterError::write(&context, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::write(context, describe_failure(response).await));
        }

        let errors = batch_errors(response.headers());
        if !errors.is_empty() {
            return Err(AdapterError::write(
                context,
                format!("{} records rejected: {}", errors.len(), errors.join("; ")),
            ));
        }
        Ok(())
    }

    async fn read_batch(&mut self, keys: &[BlobKey]) -> AdapterResult<Vec<Blob>> {
        let (Some(start), Some(stop)) = (keys.iter().min(), keys.iter().max()) else {
            return Ok(Vec::new());
        };

        // stop is exclusive
        let id = self.query(start.as_u64(), stop.as_u64() + 1).await?;
        let path = format!("{}/batch", self.entry_path);
        let context = format!("GET {path}?q={id}");

        let wanted: HashSet<BlobKey> = keys.iter().copied().collect();
        let mut blobs = Vec::with_capacity(keys.len());
        loop {
            let response = self
                .client
                .request(Method::GET, &path)
                .query(&[("q", id)])
                .send()
                .await
                .map_err(|e| AdapterError::read(&context, e))?;

            let status = response.status();
            if status == StatusCode::NO_CONTENT {
                break;
            }
            if !status.is_success() {
                return Err(AdapterError::read(context, describe_failure(response).await));
            }

            let headers = response.headers().clone();
            let records =
                parse_batch_headers(&headers).map_err(|e| AdapterError::read(&context, e))?;
            let body = response
                .bytes()
                .await
                .map_err(|e| AdapterError::read(&context, e))?;
            let page =
                split_batch_body(body, &records).map_err(|e| AdapterError::read(&context, e))?;

            blobs.extend(page.into_iter().filter(|blob| wanted.contains(&blob.key())));

            let last = headers
                .get(LAST_HEADER)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value == "true");
            if last {
                break;
            }
        }

        Ok(blobs)
    }

    async fn close(&mut self) -> AdapterResult<()> {
        if std::mem::replace(&mut self.closed, true) || !self.cleanup {
            return Ok(());
        }

        let context = format!("DELETE {}", self.bucket_path);
        let response = self
            .client
            .request(Method::DELETE, &self.bucket_path)
            .send()
            .await
            .map_err(|e| AdapterError::connection(&context, e))?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            if is_auth_failure(status) {
                tracing::warn!(bucket = %self.bucket_path, "not allowed to remove bucket");
            }
            return Err(AdapterError::connection(
                context,
                describe_failure(response).await,
            ));
        }
        Ok(())
    }
}

/// Builds the per-record headers of a batch write, one per blob in body order.
fn batch_write_headers(blobs: &[&Blob]) -> Vec<(String, String)> {
    blobs
        .iter()
        .map(|blob| {
            (
                format!("{TIME_HEADER_PREFIX}{}", blob.key()),
                format!("{},{CONTENT_TYPE_BLOB},size_class={}", blob.len(), blob.len()),
            )
        })
        .collect()
}

/// Collects per-record errors reported for a batch write.
fn batch_errors(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let ts = name.as_str().strip_prefix(ERROR_HEADER_PREFIX)?;
            Some(format!("{ts}: {}", value.to_str().unwrap_or("<invalid>")))
        })
        .collect()
}

/// Extracts `(timestamp, length)` of every record in a batch response, sorted by timestamp.
///
/// The body contains the records concatenated in timestamp order.
fn parse_batch_headers(headers: &HeaderMap) -> Result<Vec<(u64, usize)>, String> {
    let mut records = Vec::new();
    for (name, value) in headers {
        let Some(ts) = name.as_str().strip_prefix(TIME_HEADER_PREFIX) else {
            continue;
        };
        let ts: u64 = ts
            .parse()
            .map_err(|_| format!("invalid record timestamp {ts:?}"))?;
        let value = value
            .to_str()
            .map_err(|_| format!("invalid header for record {ts}"))?;
        let length = value
            .split(',')
            .next()
            .and_then(|length| length.trim().parse().ok())
            .ok_or_else(|| format!("missing length for record {ts}"))?;
        records.push((ts, length));
    }

    records.sort_unstable();
    Ok(records)
}

fn split_batch_body(body: Bytes, records: &[(u64, usize)]) -> Result<Vec<Blob>, String> {
    let expected: usize = records.iter().map(|(_, length)| length).sum();
    if expected != body.len() {
        return Err(format!(
            "batch body has {} bytes, headers announce {expected}",
            body.len()
        ));
    }

    let mut offset = 0;
    let blobs = records
        .iter()
        .map(|&(ts, length)| {
            let data = body.slice(offset..offset + length);
            offset += length;
            Blob::new(BlobKey::new(ts), data)
        })
        .collect();
    Ok(blobs)
}
