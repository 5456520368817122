use std::time::Duration;

use blobbench_harness::AdapterError;
use reqwest::{Response, StatusCode};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("blobbench/", env!("CARGO_PKG_VERSION"));

/// Default timeout for requests sent by the backend clients.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a reqwest client with required defaults.
pub fn reqwest_client(timeout: Duration) -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| AdapterError::connection("build http client", e))
}

/// Reads the body of an unsuccessful response for error messages.
pub async fn describe_failure(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.is_empty() => format!("status {status}: {}", body.trim()),
        _ => format!("status {status}"),
    }
}

/// Returns `true` if the status means the credentials were rejected.
pub fn is_auth_failure(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

/// Checks that a name is a plain identifier, safe to splice into queries.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(is_identifier("blobbench_data"));
        assert!(is_identifier("_t1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("data; DROP TABLE x"));
        assert!(!is_identifier("blobs\""));
    }
}
