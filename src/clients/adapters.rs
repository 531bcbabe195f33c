//! # Facility Adapters
//!
//! One capability implementation per forced-photometry facility, selected
//! through a name-keyed registry built at startup. Each adapter knows how
//! to classify the facility's responses (status code plus body substring
//! conventions) and how to parse a completed response into photometry
//! points. Adding a facility means registering a new implementation, not
//! branching on strings in the loops.

use crate::clients::facility::{FacilityHttpClient, FacilityResponse};
use crate::error::ClientError;
use crate::models::{FacilityTransactionRequest, PhotometryPoint};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Outcome of one poll, classified per facility
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Data is ready; parsed points accompany the transition to complete
    Complete { points: Vec<PhotometryPoint> },
    /// Facility is still working; refresh the poll timestamp and wait
    KeepPolling { note: Option<String> },
    /// Terminal facility-side failure
    Failed { reason: String },
}

#[async_trait]
pub trait FacilityAdapter: Send + Sync {
    /// Registry key
    fn name(&self) -> &'static str;

    /// Classify a raw poll response into an outcome
    fn classify(&self, response: &FacilityResponse) -> PollOutcome;

    /// Replay the stored request and classify the result
    async fn poll(
        &self,
        http: &FacilityHttpClient,
        txn: &FacilityTransactionRequest,
    ) -> Result<PollOutcome, ClientError> {
        let response = http.replay(txn).await?;
        Ok(self.classify(&response))
    }

    /// Ask the facility to cancel/delete an outstanding job. Facilities
    /// without a deletion endpoint accept the default no-op.
    async fn delete(
        &self,
        _http: &FacilityHttpClient,
        txn: &FacilityTransactionRequest,
    ) -> Result<(), ClientError> {
        debug!(facility = self.name(), txn_id = txn.id, "Facility has no deletion endpoint");
        Ok(())
    }
}

/// ATLAS-style forced photometry: job queue answers busy text while the
/// request is still being processed and a whitespace-separated table once
/// finished.
pub struct AtlasAdapter;

impl AtlasAdapter {
    const BUSY_SENTINEL: &'static str = "database is busy; try again";
}

#[async_trait]
impl FacilityAdapter for AtlasAdapter {
    fn name(&self) -> &'static str {
        "atlas"
    }

    fn classify(&self, response: &FacilityResponse) -> PollOutcome {
        if response.body.contains(Self::BUSY_SENTINEL) {
            return PollOutcome::KeepPolling {
                note: Some(Self::BUSY_SENTINEL.to_string()),
            };
        }
        match response.status {
            200 => match parse_delimited_table(&response.body, char::is_whitespace, "atlas") {
                Ok(points) if points.is_empty() => PollOutcome::KeepPolling {
                    note: Some("job accepted; no data yet".to_string()),
                },
                Ok(points) => PollOutcome::Complete { points },
                Err(reason) => PollOutcome::Failed { reason },
            },
            other => PollOutcome::Failed {
                reason: format!("HTTP {other}: {}", truncate(&response.body, 200)),
            },
        }
    }
}

/// Pan-STARRS-style forced photometry: comma-separated catalog extract;
/// an empty extract is reported as "Zero records returned" and is
/// terminal for the transaction.
pub struct PanstarrsAdapter;

impl PanstarrsAdapter {
    const EMPTY_SENTINEL: &'static str = "Zero records returned";
}

#[async_trait]
impl FacilityAdapter for PanstarrsAdapter {
    fn name(&self) -> &'static str {
        "panstarrs"
    }

    fn classify(&self, response: &FacilityResponse) -> PollOutcome {
        if response.body.contains(Self::EMPTY_SENTINEL) {
            return PollOutcome::Failed {
                reason: Self::EMPTY_SENTINEL.to_string(),
            };
        }
        match response.status {
            200 => match parse_delimited_table(&response.body, |c| c == ',', "panstarrs") {
                Ok(points) if points.is_empty() => PollOutcome::KeepPolling {
                    note: Some("extract not ready".to_string()),
                },
                Ok(points) => PollOutcome::Complete { points },
                Err(reason) => PollOutcome::Failed { reason },
            },
            503 => PollOutcome::KeepPolling {
                note: Some("service temporarily unavailable".to_string()),
            },
            other => PollOutcome::Failed {
                reason: format!("HTTP {other}: {}", truncate(&response.body, 200)),
            },
        }
    }
}

/// Parse a header-plus-rows table into photometry points. Recognized
/// columns: mjd, filter, mag, magerr, limiting_mag (case-insensitive);
/// unknown columns are ignored.
fn parse_delimited_table<F>(body: &str, is_sep: F, origin: &str) -> Result<Vec<PhotometryPoint>, String>
where
    F: Fn(char) -> bool + Copy,
{
    let mut lines = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let header = match lines.next() {
        Some(h) => h,
        None => return Ok(Vec::new()),
    };
    let columns: Vec<String> = split_row(header, is_sep)
        .into_iter()
        .map(|c| c.to_lowercase())
        .collect();
    let col = |name: &str| columns.iter().position(|c| c == name);

    let mjd_idx = col("mjd").ok_or_else(|| format!("response table missing mjd column: {header}"))?;
    let filter_idx = col("filter")
        .ok_or_else(|| format!("response table missing filter column: {header}"))?;
    let mag_idx = col("mag");
    let magerr_idx = col("magerr");
    let limit_idx = col("limiting_mag");

    let mut points = Vec::new();
    for line in lines {
        let fields = split_row(line, is_sep);
        let field = |idx: Option<usize>| idx.and_then(|i| fields.get(i)).map(|s| s.as_str());

        let mjd: f64 = field(Some(mjd_idx))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| format!("unparseable mjd in row: {line}"))?;
        let filter = field(Some(filter_idx))
            .ok_or_else(|| format!("missing filter in row: {line}"))?
            .to_string();

        points.push(PhotometryPoint {
            mjd,
            filter,
            mag: field(mag_idx).and_then(|v| v.parse().ok()),
            magerr: field(magerr_idx).and_then(|v| v.parse().ok()),
            limiting_mag: field(limit_idx).and_then(|v| v.parse().ok()),
            stream_name: None,
            origin: Some(origin.to_string()),
        });
    }
    Ok(points)
}

fn split_row<F>(line: &str, is_sep: F) -> Vec<String>
where
    F: Fn(char) -> bool,
{
    line.split(is_sep)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Name-keyed adapter registry populated at startup
pub struct AdapterRegistry {
    adapters: Arc<RwLock<HashMap<String, Arc<dyn FacilityAdapter>>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry with every built-in facility adapter registered
    pub async fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(AtlasAdapter)).await;
        registry.register(Arc::new(PanstarrsAdapter)).await;
        registry
    }

    pub async fn register(&self, adapter: Arc<dyn FacilityAdapter>) {
        let mut adapters = self.adapters.write().await;
        debug!(facility = adapter.name(), "Registered facility adapter");
        adapters.insert(adapter.name().to_string(), adapter);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn FacilityAdapter>> {
        self.adapters.read().await.get(name).cloned()
    }

    pub async fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> FacilityResponse {
        FacilityResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_atlas_busy_keeps_polling() {
        let outcome = AtlasAdapter.classify(&response(200, "database is busy; try again"));
        assert_eq!(
            outcome,
            PollOutcome::KeepPolling {
                note: Some("database is busy; try again".to_string())
            }
        );
    }

    #[test]
    fn test_atlas_table_completes() {
        let body = "MJD filter mag magerr limiting_mag\n60001.0 c 18.2 0.05 20.1\n60002.0 o 18.0 0.04 20.3";
        match AtlasAdapter.classify(&response(200, body)) {
            PollOutcome::Complete { points } => {
                assert_eq!(points.len(), 2);
                assert_eq!(points[0].filter, "c");
                assert_eq!(points[0].mag, Some(18.2));
                assert_eq!(points[0].origin.as_deref(), Some("atlas"));
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn test_atlas_non_200_fails() {
        let outcome = AtlasAdapter.classify(&response(500, "internal error"));
        assert!(matches!(outcome, PollOutcome::Failed { .. }));
    }

    #[test]
    fn test_panstarrs_zero_records_is_terminal() {
        let outcome = PanstarrsAdapter.classify(&response(200, "Zero records returned"));
        assert_eq!(
            outcome,
            PollOutcome::Failed {
                reason: "Zero records returned".to_string()
            }
        );
    }

    #[test]
    fn test_panstarrs_csv_completes() {
        let body = "mjd,filter,mag,magerr\n60001.0,g,18.2,0.05";
        match PanstarrsAdapter.classify(&response(200, body)) {
            PollOutcome::Complete { points } => {
                assert_eq!(points.len(), 1);
                assert_eq!(points[0].filter, "g");
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn test_panstarrs_503_keeps_polling() {
        assert!(matches!(
            PanstarrsAdapter.classify(&response(503, "")),
            PollOutcome::KeepPolling { .. }
        ));
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = AdapterRegistry::with_defaults().await;
        assert!(registry.get("atlas").await.is_some());
        assert!(registry.get("panstarrs").await.is_some());
        assert!(registry.get("unknown-scope").await.is_none());
        assert_eq!(registry.registered_names().await, vec!["atlas", "panstarrs"]);
    }
}
