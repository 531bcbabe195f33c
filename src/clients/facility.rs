//! # Generic Facility HTTP Client
//!
//! Replays a stored method/URL/headers/params/body tuple verbatim against
//! a facility's forced-photometry service. Responses carry no fixed
//! schema; classification happens per facility in the adapter layer.

use crate::error::ClientError;
use crate::models::FacilityTransactionRequest;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

/// Raw facility response handed to the adapter for classification
#[derive(Debug, Clone)]
pub struct FacilityResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct FacilityHttpClient {
    http: reqwest::Client,
}

impl FacilityHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { http })
    }

    /// Replay the stored request tuple exactly as it was first issued
    #[instrument(skip(self, txn), fields(facility = %txn.facility_name, txn_id = txn.id))]
    pub async fn replay(
        &self,
        txn: &FacilityTransactionRequest,
    ) -> Result<FacilityResponse, ClientError> {
        let method = Method::from_bytes(txn.method.as_bytes())
            .map_err(|_| ClientError::Transport(format!("invalid HTTP method: {}", txn.method)))?;

        let mut request = self.http.request(method, &txn.endpoint);

        if let Some(Value::Object(headers)) = &txn.headers {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }
        if let Some(Value::Object(params)) = &txn.params {
            let pairs: Vec<(String, String)> = params
                .iter()
                .filter_map(|(k, v)| {
                    v.as_str()
                        .map(str::to_string)
                        .or_else(|| Some(v.to_string()))
                        .map(|v| (k.clone(), v))
                })
                .collect();
            request = request.query(&pairs);
        }
        if let Some(body) = &txn.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(FacilityResponse { status, body })
    }
}
