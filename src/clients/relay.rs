//! # Relay System Client
//!
//! Client for the pub/sub alert relay: a validate-then-submit handshake
//! against a single endpoint with a 5-second round-trip timeout. Any
//! non-200 validate response is fatal before submission is even
//! attempted; the relay acknowledgment is synchronous, so there is no
//! reconciliation pass for this system.

use crate::builder::RelayMessage;
use crate::error::ClientError;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl RelayClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    config: RelayClientConfig,
    http: reqwest::Client,
}

impl RelayClient {
    pub fn new(config: RelayClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Validate the message against the relay without publishing it
    #[instrument(skip(self, message), fields(topic = %message.topic))]
    pub async fn validate(&self, message: &RelayMessage) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url("validate-message"))
            .json(message)
            .send()
            .await?;
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

    /// Validate then publish; validation failure stops the submission
    #[instrument(skip(self, message), fields(topic = %message.topic))]
    pub async fn publish(&self, message: &RelayMessage) -> Result<(), ClientError> {
        self.validate(message).await?;
        let response = self
            .http
            .post(self.url("submit-message"))
            .json(message)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            debug!(topic = %message.topic, "Relay message published");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::UnexpectedResponse {
            status: status.as_u16(),
            body,
        })
    }
}
