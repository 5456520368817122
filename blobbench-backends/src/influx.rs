//! Minimal InfluxDB v2 client for indexing blob names by time.

use std::time::{Duration, UNIX_EPOCH};

use blobbench_harness::{AdapterError, AdapterResult, BlobKey};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::common::{self, DEFAULT_REQUEST_TIMEOUT, describe_failure};
use crate::secret::Secret;

/// Connection parameters for InfluxDB v2.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub token: Option<Secret>,
    pub org: String,
    /// Bucket holding the index. Created on connect if missing.
    pub bucket: String,
    pub measurement: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".into(),
            token: None,
            org: "blobbench".into(),
            bucket: "blobbench".into(),
            measurement: "blobs".into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub(crate) struct InfluxClient {
    http: reqwest::Client,
    url: String,
    token: Option<Secret>,
    org: String,
    bucket: String,
    measurement: String,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig) -> AdapterResult<Self> {
        Ok(Self {
            http: common::reqwest_client(config.request_timeout)?,
            url: config.url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            measurement: config.measurement.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.url));
        match &self.token {
            Some(token) => {
                builder.header(AUTHORIZATION, format!("Token {}", token.expose_secret().as_str()))
            }
            None => builder,
        }
    }

    pub async fn ping(&self) -> AdapterResult<()> {
        let response = self
            .request(Method::GET, "/ping")
            .send()
            .await
            .map_err(|e| AdapterError::connection("GET /ping", e))?;

        if !response.status().is_success() {
            return Err(AdapterError::connection(
                "GET /ping",
                describe_failure(response).await,
            ));
        }
        Ok(())
    }

    /// Creates the bucket unless it exists already.
    pub async fn ensure_bucket(&self) -> AdapterResult<()> {
        #[derive(Deserialize)]
        struct Buckets {
            #[serde(default)]
            buckets: Vec<serde_json::Value>,
        }
        #[derive(Deserialize)]
        struct Orgs {
            #[serde(default)]
            orgs: Vec<Org>,
        }
        #[derive(Deserialize)]
        struct Org {
            id: String,
        }

        let context = "GET /api/v2/buckets";
        let existing: Buckets = self
            .get_json("/api/v2/buckets", &[("name", &self.bucket)])
            .await
            .map_err(|e| AdapterError::connection(context, e))?;
        if !existing.buckets.is_empty() {
            return Ok(());
        }

        let context = "GET /api/v2/orgs";
        let orgs: Orgs = self
            .get_json("/api/v2/orgs", &[("org", &self.org)])
            .await
            .map_err(|e| AdapterError::connection(context, e))?;
        let Some(org) = orgs.orgs.into_iter().next() else {
            return Err(AdapterError::connection(
                context,
                format!("organization {:?} does not exist", self.org),
            ));
        };

        let context = "POST /api/v2/buckets";
        let response = self
            .request(Method::POST, "/api/v2/buckets")
            .json(&serde_json::json!({
                "orgID": org.id,
                "name": self.bucket,
                "retentionRules": [],
            }))
            .send()
            .await
            .map_err(|e| AdapterError::connection(context, e))?;
        if !response.status().is_success() {
            return Err(AdapterError::connection(
                context,
                describe_failure(response).await,
            ));
        }

        tracing::debug!(bucket = %self.bucket, "created influx bucket");
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &String)],
    ) -> Result<T, String> {
        let response = self
            .request(Method::GET, path)
            .query(query)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(describe_failure(response).await);
        }
        response.json().await.map_err(|e| e.to_string())
    }

    /// Records the object names of all given blobs in a single write.
    pub async fn index(&self, entries: &[(BlobKey, u64, &str)]) -> AdapterResult<()> {
        let body = entries
            .iter()
            .map(|(key, size, name)| line(&self.measurement, *key, *size, name))
            .collect::<Vec<_>>()
            .join("\n");

        let context = "POST /api/v2/write";
        let response = self
            .request(Method::POST, "/api/v2/write")
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "us"),
            ])
            .body(body)
            .send()
            .await
            .map_err(|e| AdapterError::write(context, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::write(context, describe_failure(response).await));
        }
        Ok(())
    }

    /// Returns the object names indexed in `start..=end`.
    pub async fn lookup(
        &self,
        start: BlobKey,
        end: BlobKey,
        size_class: Option<u64>,
    ) -> AdapterResult<Vec<String>> {
        let query = flux_lookup(&self.bucket, &self.measurement, start, end, size_class);

        let context = "POST /api/v2/query";
        let response = self
            .request(Method::POST, "/api/v2/query")
            .query(&[("org", self.org.as_str())])
            .header(ACCEPT, "application/csv")
            .json(&serde_json::json!({
                "query": query,
                "type": "flux",
                "dialect": { "header": true, "annotations": [] },
            }))
            .send()
            .await
            .map_err(|e| AdapterError::read(context, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::read(context, describe_failure(response).await));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::read(context, e))?;
        parse_values(&body).map_err(|e| AdapterError::read(context, e))
    }

    /// Deletes all index points of the measurement in `start..=end`.
    pub async fn delete(&self, start: BlobKey, end: BlobKey) -> AdapterResult<()> {
        let context = "POST /api/v2/delete";
        let response = self
            .request(Method::POST, "/api/v2/delete")
            .query(&[("org", self.org.as_str()), ("bucket", self.bucket.as_str())])
            .json(&serde_json::json!({
                "start": rfc3339(start.as_u64()),
                "stop": rfc3339(end.as_u64() + 1),
                "predicate": format!("_measurement=\"{}\"", self.measurement),
            }))
            .send()
            .await
            .map_err(|e| AdapterError::connection(context, e))?;

        if !response.status().is_success() {
            return Err(AdapterError::connection(
                context,
                describe_failure(response).await,
            ));
        }
        Ok(())
    }
}

fn rfc3339(micros: u64) -> String {
    humantime::format_rfc3339_micros(UNIX_EPOCH + Duration::from_micros(micros)).to_string()
}

/// Escapes commas, spaces and equal signs in measurement names and tag values.
fn escape_key(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_string_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Formats one point of line protocol with microsecond precision.
fn line(measurement: &str, key: BlobKey, size_class: u64, name: &str) -> String {
    format!(
        "{},size_class={size_class} object=\"{}\" {key}",
        escape_key(measurement),
        escape_string_field(name),
    )
}

fn flux_lookup(
    bucket: &str,
    measurement: &str,
    start: BlobKey,
    end: BlobKey,
    size_class: Option<u64>,
) -> String {
    let size_filter = match size_class {
        Some(size) => format!(" and r.size_class == \"{size}\""),
        None => String::new(),
    };

    // range stop is exclusive, so add one microsecond
    format!(
        "from(bucket: {bucket:?})\n  \
         |> range(start: time(v: {start}), stop: time(v: {stop}))\n  \
         |> filter(fn: (r) => r._measurement == {measurement:?} and r._field == \"object\"{size_filter})\n  \
         |> keep(columns: [\"_time\", \"_value\"])\n  \
         |> group()",
        start = start.as_nanos(),
        stop = end.as_nanos() + 1000,
    )
}

/// Extracts the `_value` column from a Flux CSV response.
///
/// Responses may contain several tables, each with its own header row and separated by blank
/// lines.
fn parse_values(body: &str) -> Result<Vec<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut column = None;
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if let Some(index) = record.iter().position(|field| field == "_value") {
            column = Some(index);
            continue;
        }
        if let Some(value) = column.and_then(|index| record.get(index)) {
            values.push(value.to_owned());
        }
    }
    Ok(values)
}
