//! One-shot control requests: authentication, emergency, takeover, agent,
//! alerts and the official dashboard queries.
//!
//! Each call is a single request/response with no retry. Failures carry the
//! same classification as status polls, plus `Forbidden` for role checks and
//! `Rejected` for requests the backend refused as invalid.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::USER_AGENT;
use crate::config::Config;
use crate::credential::{CredentialSource, Session};
use crate::fetcher::{FailureKind, backend_error_message};
use crate::snapshot::{Lane, Mode};

/// Categories of control request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorKind {
    /// HTTP 401: missing, expired or invalid credential (or bad login).
    Unauthenticated,
    /// HTTP 403: the session's role may not perform this action.
    Forbidden,
    /// Other 4xx: the backend refused the parameters.
    Rejected,
    /// Network, timeout, 5xx or undecodable response.
    Transient,
}

impl fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionErrorKind::Unauthenticated => write!(f, "unauthenticated"),
            ActionErrorKind::Forbidden => write!(f, "forbidden"),
            ActionErrorKind::Rejected => write!(f, "rejected"),
            ActionErrorKind::Transient => write!(f, "transient"),
        }
    }
}

impl From<FailureKind> for ActionErrorKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Unauthenticated => ActionErrorKind::Unauthenticated,
            FailureKind::Transient => ActionErrorKind::Transient,
        }
    }
}

/// Structured error from a control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub kind: ActionErrorKind,
    /// One-line summary suitable for display
    pub message: String,
}

impl ActionError {
    pub fn new(kind: ActionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies a non-success HTTP status, preferring the backend's `error` field.
    pub fn http_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 => ActionErrorKind::Unauthenticated,
            403 => ActionErrorKind::Forbidden,
            400..=499 => ActionErrorKind::Rejected,
            _ => ActionErrorKind::Transient,
        };
        let message = match backend_error_message(body) {
            Some(msg) => format!("HTTP {status}: {msg}"),
            None => format!("HTTP {status}"),
        };
        Self::new(kind, message)
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.kind == ActionErrorKind::Unauthenticated
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActionError {}

/// Reply to an emergency toggle. `lane` is echoed only when switching on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmergencyAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub lane: Option<Lane>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TakeoverAck {
    #[serde(default)]
    pub ok: bool,
    pub lane: Lane,
    /// Seconds the manual phase will hold.
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrainReport {
    pub status: String,
    pub iters: u64,
    pub buffer_size: u64,
}

/// Learning agent statistics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentStats {
    /// Exploration rate.
    pub eps: f64,
    pub buffer_len: u64,
}

/// `{"agent": null}` when no agent is loaded.
#[derive(Deserialize)]
#[serde(untagged)]
enum AgentStatsBody {
    Active(AgentStats),
    Missing {
        #[allow(dead_code)]
        agent: Option<Value>,
    },
}

/// Reply to a detection source switch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModeAck {
    #[serde(default)]
    pub status: String,
    pub mock: bool,
}

impl ModeAck {
    /// Mode the status feed will report from now on.
    pub fn mode(&self) -> Mode {
        if self.mock { Mode::Mock } else { Mode::Camera }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PedestrianAck {
    #[serde(default)]
    pub ok: bool,
    pub lane: Lane,
}

/// A lane that sat at maximum green for a prolonged period.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alert {
    pub lane: Lane,
    pub msg: String,
    /// Unix seconds.
    pub ts: f64,
    #[serde(default)]
    pub ack: bool,
}

/// One manual takeover as recorded in the override log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverrideRecord {
    /// Unix seconds.
    pub ts: f64,
    pub user: String,
    pub lane: Lane,
    pub duration: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
struct OverrideLog {
    #[serde(default)]
    overrides: Vec<OverrideRecord>,
}

/// Normal fit of a lane's recorded counts, sampled over `mu ± 4 sigma`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub mu: f64,
    pub sigma: f64,
    #[serde(default)]
    pub x: Vec<f64>,
    #[serde(default)]
    pub pdf: Vec<f64>,
    #[serde(default)]
    pub cdf: Vec<f64>,
}

/// The backend answers 200 with `{"error": ...}` when it lacks history.
#[derive(Deserialize)]
#[serde(untagged)]
enum PredictionBody {
    Ready(Prediction),
    Unavailable { error: String },
}

/// Default training iterations used by the backend when none are given.
pub const DEFAULT_TRAIN_ITERS: u32 = 1000;

/// HTTP client for control endpoints.
#[derive(Debug, Clone)]
pub struct ControlClient<C> {
    http: reqwest::Client,
    base: Url,
    credentials: C,
}

impl<C: CredentialSource> ControlClient<C> {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration, credentials: C) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base,
            credentials,
        })
    }

    /// # Errors
    /// Returns an error if the configured base URL is invalid.
    pub fn from_config(config: &Config, credentials: C) -> Result<Self> {
        Self::new(
            &config.resolved_base_url()?,
            config.request_timeout(),
            credentials,
        )
    }

    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    /// Exchanges credentials for a session token and role.
    ///
    /// # Errors
    /// `Unauthenticated` on bad credentials; see [`ActionError`].
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ActionError> {
        let body = json!({ "username": username, "password": password });
        self.send(Method::POST, "/auth/login", Some(body), false)
            .await
    }

    /// # Errors
    /// `Rejected` when the username exists or parameters are missing.
    pub async fn signup(&self, username: &str, password: &str) -> Result<(), ActionError> {
        let body = json!({ "username": username, "password": password });
        let _: Value = self
            .send(Method::POST, "/auth/signup", Some(body), false)
            .await?;
        Ok(())
    }

    /// Switches emergency preemption on (optionally for one lane) or off.
    ///
    /// # Errors
    /// See [`ActionError`].
    pub async fn set_emergency(
        &self,
        on: bool,
        lane: Option<Lane>,
    ) -> Result<EmergencyAck, ActionError> {
        let body = json!({ "on": on, "lane": lane });
        self.send(Method::POST, "/api/emergency", Some(body), true)
            .await
    }

    /// Forces `lane` green for `duration_secs`. Officials only.
    ///
    /// # Errors
    /// `Forbidden` for non-official sessions; see [`ActionError`].
    pub async fn takeover(&self, lane: Lane, duration_secs: u32) -> Result<TakeoverAck, ActionError> {
        let body = json!({ "lane": lane, "duration": duration_secs });
        self.send(Method::POST, "/official/takeover", Some(body), true)
            .await
    }

    /// Returns control to the automatic controller. Officials only.
    ///
    /// # Errors
    /// See [`ActionError`].
    pub async fn release(&self) -> Result<(), ActionError> {
        let _: Value = self
            .send(Method::POST, "/official/release", Some(json!({})), true)
            .await?;
        Ok(())
    }

    /// # Errors
    /// See [`ActionError`].
    pub async fn train_rl(&self, iters: u32) -> Result<TrainReport, ActionError> {
        let body = json!({ "iters": iters });
        self.send(Method::POST, "/api/train_rl", Some(body), true)
            .await
    }

    /// Returns `None` when the backend has no agent loaded.
    ///
    /// # Errors
    /// See [`ActionError`].
    pub async fn agent_stats(&self) -> Result<Option<AgentStats>, ActionError> {
        let body: AgentStatsBody = self
            .send(Method::GET, "/api/agent_stats", None, true)
            .await?;
        Ok(match body {
            AgentStatsBody::Active(stats) => Some(stats),
            AgentStatsBody::Missing { .. } => None,
        })
    }

    /// Switches the detection source between the synthetic generator and the camera.
    ///
    /// # Errors
    /// See [`ActionError`].
    pub async fn set_mode(&self, mock: bool) -> Result<ModeAck, ActionError> {
        let body = json!({ "mock": mock });
        self.send(Method::POST, "/api/set_mode", Some(body), true)
            .await
    }

    /// Queues a pedestrian crossing request for `lane`.
    ///
    /// # Errors
    /// See [`ActionError`].
    pub async fn request_pedestrian(&self, lane: Lane) -> Result<PedestrianAck, ActionError> {
        let body = json!({ "lane": lane });
        self.send(Method::POST, "/api/pedestrian", Some(body), true)
            .await
    }

    /// All recorded alerts, acknowledged or not. Officials only.
    ///
    /// # Errors
    /// See [`ActionError`].
    pub async fn alerts(&self) -> Result<Vec<Alert>, ActionError> {
        self.send(Method::GET, "/alerts", None, true).await
    }

    /// Marks every alert for `lane` as acknowledged. Officials only.
    ///
    /// # Errors
    /// See [`ActionError`].
    pub async fn ack_alert(&self, lane: Lane) -> Result<(), ActionError> {
        let body = json!({ "lane": lane });
        let _: Value = self
            .send(Method::POST, "/alerts/ack", Some(body), true)
            .await?;
        Ok(())
    }

    /// Manual takeovers recorded so far, oldest first. Officials only.
    ///
    /// # Errors
    /// See [`ActionError`].
    pub async fn override_log(&self) -> Result<Vec<OverrideRecord>, ActionError> {
        let log: OverrideLog = self.send(Method::GET, "/api/logs", None, true).await?;
        Ok(log.overrides)
    }

    /// Distribution of `lane`'s counts fitted from recorded history. Officials only.
    ///
    /// # Errors
    /// `Rejected` when the backend has too little history; see [`ActionError`].
    pub async fn prediction(&self, lane: Lane) -> Result<Prediction, ActionError> {
        let path = format!("/official/prediction?lane={}", lane.index());
        match self.send(Method::GET, &path, None, true).await? {
            PredictionBody::Ready(prediction) => Ok(prediction),
            PredictionBody::Unavailable { error } => Err(ActionError::new(
                ActionErrorKind::Rejected,
                format!("prediction unavailable: {error}"),
            )),
        }
    }

    async fn send<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        authenticated: bool,
    ) -> Result<R, ActionError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| ActionError::new(ActionErrorKind::Transient, format!("bad URL: {e}")))?;

        let mut request = self.http.request(method.clone(), url);
        if authenticated
            && let Some(token) = self.credentials.credential().filter(|t| !t.is_empty())
        {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        tracing::debug!(%method, path, "sending control request");
        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("request timed out: {e}")
            } else {
                format!("request failed: {e}")
            };
            ActionError::new(ActionErrorKind::Transient, message)
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ActionError::new(
                ActionErrorKind::Transient,
                format!("failed to read response body: {e}"),
            )
        })?;

        if !status.is_success() {
            let err = ActionError::http_status(status.as_u16(), &text);
            tracing::warn!(%method, path, kind = %err.kind, "control request failed: {err}");
            return Err(err);
        }
        serde_json::from_str(&text).map_err(|e| {
            ActionError::new(
                ActionErrorKind::Transient,
                format!("failed to decode {path} response: {e}"),
            )
        })
    }
}
