//! Request/response access to the versioned backend API.
//!
//! The pipeline only needs two verbs, so the backend is hidden behind the
//! [`Transport`] trait. Every backend response is a JSON envelope carrying a
//! `status` field; [`evaluate_envelope`] turns an HTTP response into either
//! the parsed payload or a [`TransportError`].

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// Backend endpoint paths, relative to the versioned API root.
pub mod endpoints {
    /// SDK site configuration (uniqueness throttle).
    pub const SITE_DETAILS: &str = "site_details/sdk";
    /// Monitored region list.
    pub const BEACON_REGIONS: &str = "beacon_regions";
    /// Region enter/exit telemetry.
    pub const REGION_ACTIONS: &str = "beacon_region_actions";
    /// Range sighting batches.
    pub const RANGE_ACTIONS: &str = "beacon_range_actions";
}

/// Status code used when the request never produced an HTTP response.
pub const NETWORK_ERROR_CODE: i64 = 0;

/// A failed backend call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Request failed ({code}): {message}")]
pub struct TransportError {
    /// HTTP status, envelope status, or [`NETWORK_ERROR_CODE`].
    pub code: i64,
    /// Backend or client message.
    pub message: String,
}

impl TransportError {
    /// Create an error.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error for a request that never reached the backend.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(NETWORK_ERROR_CODE, message)
    }
}

/// Result type for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// HTTP verb of a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// Backend access used by the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET against `path` and return the success envelope.
    async fn get(&self, path: &str) -> TransportResult<Value>;

    /// Issue a POST with a JSON body against `path` and return the success envelope.
    async fn post(&self, path: &str, body: Value) -> TransportResult<Value>;
}

/// Interpret a raw backend response.
///
/// - A POST answered with HTTP 2xx and an empty body counts as success.
/// - GET succeeds only when the envelope `status` is 200, POST when it is
///   within 200..=300. A missing envelope status falls back to the HTTP status.
///
/// # Errors
///
/// Returns a [`TransportError`] carrying the envelope (or HTTP) status and the
/// backend message when the call did not succeed.
pub fn evaluate_envelope(method: Method, http_status: u16, body: &[u8]) -> TransportResult<Value> {
    let http_ok = (200..=300).contains(&http_status);
    if method == Method::Post && http_ok && body.len() <= 1 {
        return Ok(json!({ "status": 200 }));
    }

    let envelope: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) if http_ok => {
            return Err(TransportError::new(
                i64::from(http_status),
                format!("Malformed response body: {e}"),
            ))
        }
        Err(_) => {
            return Err(TransportError::new(
                i64::from(http_status),
                String::from_utf8_lossy(body).trim().to_string(),
            ))
        }
    };

    let status = envelope
        .get("status")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| i64::from(http_status));
    let succeeded = match method {
        Method::Get => status == 200,
        Method::Post => (200..=300).contains(&status),
    };

    if succeeded {
        Ok(envelope)
    } else {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Request failed")
            .to_string();
        Err(TransportError::new(status, message))
    }
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
    use serde_json::Value;
    use tracing::debug;
    use url::Url;

    use super::{evaluate_envelope, Method, Transport, TransportError, TransportResult};
    use crate::config::SdkConfig;

    const TOKEN_HEADER: &str = "x-api-token";
    const MODE_HEADER: &str = "x-sdk-mode";
    const VERSION_HEADER: &str = "x-sdk-version";

    /// [`Transport`] over HTTPS using `reqwest`.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: reqwest::Client,
        base_url: Url,
    }

    impl HttpTransport {
        /// Create a transport for `base_url`, authenticating with `api_token`.
        ///
        /// # Errors
        ///
        /// Returns an error if the URL or token are unusable, or the HTTP
        /// client cannot be built.
        pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> TransportResult<Self> {
            let mut root = base_url.trim().to_string();
            if !root.ends_with('/') {
                root.push('/');
            }
            let base_url = Url::parse(&root)
                .map_err(|e| TransportError::network(format!("Invalid base URL '{base_url}': {e}")))?;

            let token = HeaderValue::from_str(api_token)
                .map_err(|e| TransportError::network(format!("Invalid API token: {e}")))?;
            let mut headers = HeaderMap::new();
            headers.insert(TOKEN_HEADER, token.clone());
            headers.insert(AUTHORIZATION, token);
            headers.insert(MODE_HEADER, HeaderValue::from_static("sdk"));
            headers.insert(
                VERSION_HEADER,
                HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
            );

            let client = reqwest::Client::builder()
                .timeout(timeout)
                .default_headers(headers)
                .build()
                .map_err(|e| TransportError::network(format!("Failed to create HTTP client: {e}")))?;

            Ok(Self { client, base_url })
        }

        /// Create a transport from instance configuration.
        ///
        /// # Errors
        ///
        /// See [`HttpTransport::new`].
        pub fn from_config(config: &SdkConfig) -> TransportResult<Self> {
            Self::new(
                &config.api_base_url,
                &config.api_token,
                Duration::from_secs(config.request_timeout_secs),
            )
        }

        fn url(&self, path: &str) -> TransportResult<Url> {
            self.base_url
                .join(path.trim_start_matches('/'))
                .map_err(|e| TransportError::network(format!("Invalid path '{path}': {e}")))
        }

        async fn finish(method: Method, response: reqwest::Response) -> TransportResult<Value> {
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            debug!(status, bytes = body.len(), "Backend responded");
            evaluate_envelope(method, status, &body)
        }
    }

    fn map_reqwest_error(err: reqwest::Error) -> TransportError {
        err.status().map_or_else(
            || TransportError::network(err.to_string()),
            |status| TransportError::new(i64::from(status.as_u16()), err.to_string()),
        )
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn get(&self, path: &str) -> TransportResult<Value> {
            let url = self.url(path)?;
            debug!(%url, "GET");
            let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
            Self::finish(Method::Get, response).await
        }

        async fn post(&self, path: &str, body: Value) -> TransportResult<Value> {
            let url = self.url(path)?;
            debug!(%url, "POST");
            let response = self
                .client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            Self::finish(Method::Post, response).await
        }
    }
}
