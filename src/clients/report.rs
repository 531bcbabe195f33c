//! # Report System Client
//!
//! Client for the public transient-report clearinghouse: a
//! validate-then-submit handshake plus a status-check endpoint polled by
//! the reconciliation loop. Submission retries HTTP 429 through the
//! configured [`RetryPolicy`] (24 x 10s by default); 401 and any other
//! non-200 are terminal for the attempt. Every call carries a hard
//! timeout regardless of the retry budget.

use crate::error::ClientError;
use crate::retry::RetryPolicy;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Substring in a status-check body meaning the clearinghouse already
/// holds an identical report
const IDENTICAL_REPORT_SENTINEL: &str = "identical report already exists";

/// Explicit configuration; nothing is read from process-wide state
#[derive(Debug, Clone)]
pub struct ReportClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub bot_id: Option<i64>,
    pub bot_name: Option<String>,
    pub source_group_id: Option<i64>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ReportClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            bot_id: None,
            bot_name: None,
            source_group_id: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Classified reply from the status-check endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum ReportStatusReply {
    /// New object created and report posted
    ObjectCreated { name: String, note: Option<String> },
    /// Report posted against an already-known object
    ExistingObject { name: String, note: Option<String> },
    /// The clearinghouse already holds an identical report
    IdenticalReportExists,
    /// Report not yet visible; retry later
    NotFoundYet,
    /// Structured per-field rejection
    FieldErrors { raw: Value },
}

#[derive(Debug, Clone)]
pub struct ReportClient {
    config: ReportClientConfig,
    http: reqwest::Client,
}

impl ReportClient {
    pub fn new(config: ReportClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http
            .post(self.url(path))
            .header("x-api-key", &self.config.api_key)
            .json(payload);
        if let Some(bot_id) = self.config.bot_id {
            request = request.header("x-bot-id", bot_id);
        }
        if let Some(bot_name) = &self.config.bot_name {
            request = request.header("x-bot-name", bot_name);
        }
        Ok(request.send().await?)
    }

    /// Validate a report payload without submitting it
    #[instrument(skip(self, payload))]
    pub async fn validate(&self, payload: &Value) -> Result<(), ClientError> {
        let response = self.post("validate", payload).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::RemoteValidation(format!(
            "HTTP {}: {body}",
            status.as_u16()
        )))
    }

    /// Submit a validated report, retrying rate-limit responses.
    ///
    /// Returns the external report id assigned by the clearinghouse.
    #[instrument(skip(self, payload))]
    pub async fn submit(&self, payload: &Value) -> Result<String, ClientError> {
        let retry = self.config.retry.clone();
        retry
            .execute("report_submit", || self.submit_once(payload))
            .await
    }

    async fn submit_once(&self, payload: &Value) -> Result<String, ClientError> {
        let response = self.post("submit-report", payload).await?;
        let status = response.status();
        match status.as_u16() {
            200 => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
                let report_id = body
                    .get("report_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| body.get("report_id").and_then(Value::as_i64).map(|n| n.to_string()))
                    .ok_or_else(|| {
                        ClientError::MalformedResponse(format!(
                            "accept response missing report_id: {body}"
                        ))
                    })?;
                debug!(report_id, "Report accepted by clearinghouse");
                Ok(report_id)
            }
            429 => Err(ClientError::RateLimited),
            401 => Err(ClientError::Unauthorized),
            other => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::UnexpectedResponse { status: other, body })
            }
        }
    }

    /// Query the status-check endpoint for a previously submitted report
    #[instrument(skip(self))]
    pub async fn check_status(&self, report_id: &str) -> Result<ReportStatusReply, ClientError> {
        let payload = serde_json::json!({ "report_id": report_id });
        let response = self.post("report-status", &payload).await?;
        let status = response.status();
        match status.as_u16() {
            404 => Ok(ReportStatusReply::NotFoundYet),
            400 => {
                let raw: Value = response.json().await.unwrap_or(Value::Null);
                Ok(ReportStatusReply::FieldErrors { raw })
            }
            200 => {
                let body = response.text().await.unwrap_or_default();
                if body.contains(IDENTICAL_REPORT_SENTINEL) {
                    return Ok(ReportStatusReply::IdenticalReportExists);
                }
                let parsed: Value = serde_json::from_str(&body)
                    .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
                Self::classify_feedback(&parsed)
            }
            other => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::UnexpectedResponse { status: other, body })
            }
        }
    }

    /// Nested status codes: 100 means a new object was created and the
    /// report posted, 101 means the report posted against an existing
    /// object.
    fn classify_feedback(body: &Value) -> Result<ReportStatusReply, ClientError> {
        let object = body
            .get("object")
            .ok_or_else(|| ClientError::MalformedResponse(format!("missing object block: {body}")))?;
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::MalformedResponse(format!("missing object name: {body}"))
            })?;
        let note = object
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        match object.get("code").and_then(Value::as_i64) {
            Some(100) => Ok(ReportStatusReply::ObjectCreated { name, note }),
            Some(101) => Ok(ReportStatusReply::ExistingObject { name, note }),
            other => Err(ClientError::MalformedResponse(format!(
                "unrecognized status code {other:?}: {body}"
            ))),
        }
    }
}
