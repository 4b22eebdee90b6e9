//! One request/response cycle against the backend's status endpoint.
//!
//! The fetcher never retries and never returns an opaque error: every outcome
//! is either a [`Snapshot`] or a classified [`Failure`]. Retry cadence belongs
//! to the poll loop.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::USER_AGENT;
use crate::config::Config;
use crate::snapshot::Snapshot;

/// Path of the status endpoint, relative to the backend base URL.
pub const STATUS_PATH: &str = "/api/traffic_data";

/// Classification of a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend no longer accepts the session credential.
    Unauthenticated,
    /// Network, server or decode failure; retried on the normal cadence.
    Transient,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Unauthenticated => write!(f, "unauthenticated"),
            FailureKind::Transient => write!(f, "transient"),
        }
    }
}

/// A classified fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// One-line description suitable for display.
    pub detail: String,
}

impl Failure {
    pub fn unauthenticated() -> Self {
        Self {
            kind: FailureKind::Unauthenticated,
            detail: "unauthenticated".to_string(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            detail: detail.into(),
        }
    }

    /// Classifies a non-success HTTP status.
    ///
    /// 401 is always `Unauthenticated`, whatever the body says. Anything else is
    /// `Transient`, with the backend's `error` field folded into the detail.
    pub fn http_status(status: u16, body: &str) -> Self {
        if status == StatusCode::UNAUTHORIZED.as_u16() {
            return Self::unauthenticated();
        }
        match backend_error_message(body) {
            Some(msg) => Self::transient(format!("HTTP {status}: {msg}")),
            None => Self::transient(format!("HTTP {status}")),
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.kind == FailureKind::Unauthenticated
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail)
    }
}

impl std::error::Error for Failure {}

/// Extracts `{"error": "..."}` (or `{"error": {"message": "..."}}`) from a body.
pub(crate) fn backend_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    error
        .as_str()
        .or_else(|| error.get("message").and_then(Value::as_str))
        .map(ToString::to_string)
}

/// Anything that can produce one status snapshot per call.
///
/// `credential` is read by the caller immediately before each call, so a
/// source must not cache it.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(
        &self,
        credential: Option<&str>,
    ) -> impl Future<Output = Result<Snapshot, Failure>> + Send;
}

/// HTTP source backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    status_url: Url,
}

impl HttpFetcher {
    /// Creates a fetcher for `base_url` with a per-request timeout.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        let status_url = base
            .join(STATUS_PATH)
            .with_context(|| format!("Cannot derive status URL from {base_url}"))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, status_url })
    }

    /// Creates a fetcher from resolved configuration.
    ///
    /// # Errors
    /// Returns an error if the configured base URL is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.resolved_base_url()?, config.request_timeout())
    }

    pub fn status_url(&self) -> &Url {
        &self.status_url
    }
}

impl SnapshotSource for HttpFetcher {
    async fn fetch(&self, credential: Option<&str>) -> Result<Snapshot, Failure> {
        let mut request = self.http.get(self.status_url.clone());
        if let Some(token) = credential.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Failure::transient(format!("request timed out: {e}"))
            } else {
                Failure::transient(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Failure::unauthenticated());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Failure::transient(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(Failure::http_status(
                status.as_u16(),
                &String::from_utf8_lossy(&body),
            ));
        }

        Snapshot::from_json(&body).map_err(|e| Failure::transient(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_401_is_unauthenticated_regardless_of_body() {
        let failure = Failure::http_status(401, r#"{"error":"invalid_token"}"#);
        assert_eq!(failure.kind, FailureKind::Unauthenticated);
        assert!(failure.is_unauthenticated());

        let bare = Failure::http_status(401, "");
        assert_eq!(bare, Failure::unauthenticated());
    }

    #[test]
    fn test_other_statuses_are_transient_with_backend_message() {
        let failure = Failure::http_status(500, r#"{"error":"detection_failed"}"#);
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(failure.detail, "HTTP 500: detection_failed");

        let nested = Failure::http_status(502, r#"{"error":{"message":"upstream down"}}"#);
        assert_eq!(nested.detail, "HTTP 502: upstream down");

        let plain = Failure::http_status(503, "Service Unavailable");
        assert_eq!(plain.detail, "HTTP 503");
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&Failure::unauthenticated()).unwrap();
        assert!(json.contains(r#""kind":"unauthenticated""#));
        assert_eq!(FailureKind::Transient.to_string(), "transient");
    }

    #[test]
    fn test_fetcher_rejects_invalid_base_url() {
        assert!(HttpFetcher::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_status_url_is_joined_onto_base() {
        let fetcher = HttpFetcher::new("http://127.0.0.1:5000", Duration::from_secs(1)).unwrap();
        assert_eq!(
            fetcher.status_url().as_str(),
            "http://127.0.0.1:5000/api/traffic_data"
        );
    }
}
