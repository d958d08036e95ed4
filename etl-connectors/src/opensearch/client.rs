use std::time::Duration;

use etl::error::{ErrorKind, EtlResult};
use etl::etl_error;
use etl_config::shared::OpenSearchConnectionConfig;
use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Error type reported by a node whose memory circuit breaker tripped.
const CIRCUIT_BREAKING_EXCEPTION: &str = "circuit_breaking_exception";

/// Maps a failed response to an [`ErrorKind`].
///
/// Rejections caused by memory pressure surface as [`ErrorKind::SourceResourceExhausted`], both
/// when the node answers `429 Too Many Requests` and when a circuit breaker reports through
/// another status.
pub(crate) fn classify_response(status: StatusCode, body: &Value) -> ErrorKind {
    let error_types = [
        body.pointer("/error/type"),
        body.pointer("/error/caused_by/type"),
        body.pointer("/error/root_cause/0/type"),
    ];
    let circuit_breaker = error_types
        .iter()
        .flatten()
        .any(|typ| typ.as_str() == Some(CIRCUIT_BREAKING_EXCEPTION));

    if status == StatusCode::TOO_MANY_REQUESTS || circuit_breaker {
        return ErrorKind::SourceResourceExhausted;
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AuthenticationError,
        _ => ErrorKind::SourceQueryFailed,
    }
}

/// Thin JSON-over-HTTP client for an OpenSearch cluster.
///
/// Cheaply cloneable: [`reqwest::Client`] keeps its connection pool behind an `Arc`.
#[derive(Debug, Clone)]
pub struct OpenSearchClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl OpenSearchClient {
    pub fn new(config: &OpenSearchConnectionConfig) -> EtlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| {
                etl_error!(
                    ErrorKind::ConfigError,
                    "Invalid OpenSearch client settings",
                    e.to_string(),
                    source: e
                )
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            username: config.username.clone(),
            password: config
                .password
                .as_ref()
                .map(|password| password.expose_secret().clone()),
        })
    }

    /// Sends a request and decodes the JSON response body.
    ///
    /// `path` is appended to the base URL and must start with `/`.
    pub(crate) async fn send<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> EtlResult<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method.clone(), &url);

        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_connect() {
                ErrorKind::SourceConnectionFailed
            } else {
                ErrorKind::SourceQueryFailed
            };
            etl_error!(
                kind,
                "OpenSearch request failed",
                format!("{method} {path} failed: {e}"),
                source: e
            )
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            etl_error!(
                ErrorKind::SourceQueryFailed,
                "OpenSearch response could not be read",
                format!("{method} {path} returned an unreadable body: {e}"),
                source: e
            )
        })?;

        if !status.is_success() {
            let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            return Err(etl_error!(
                classify_response(status, &body),
                "OpenSearch request rejected",
                format!("{method} {path} returned HTTP {status}: {text}")
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            etl_error!(
                ErrorKind::DeserializationError,
                "Invalid OpenSearch response",
                format!("{method} {path} returned an unexpected body: {e}"),
                source: e
            )
        })
    }

    /// Verifies that the cluster answers.
    pub async fn ping(&self) -> EtlResult<()> {
        self.send::<Value>(Method::GET, "/", None)
            .await
            .map(|_| ())
            .map_err(|err| match err.kind() {
                ErrorKind::SourceQueryFailed => etl_error!(
                    ErrorKind::SourceConnectionFailed,
                    "OpenSearch connectivity check failed",
                    err.to_string(),
                    source: err
                ),
                _ => err,
            })
    }
}
