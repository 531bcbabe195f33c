//! # Dispatch Configuration
//!
//! Explicit configuration for every tunable in the engine: external base
//! URLs and credentials, retry budget, polling intervals, staleness
//! thresholds, and HTTP timeouts. Values come from [`Default`] with
//! environment variable overrides via [`DispatchConfig::from_env`]; no
//! global mutable state is read at import time - clients and loops receive
//! the config struct through their constructors.

use crate::error::{DispatchError, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub database_url: String,

    /// Report clearinghouse base URL and credentials
    pub report_base_url: String,
    pub report_api_key: String,

    /// Pub/sub alert relay base URL
    pub relay_base_url: String,

    /// Rate-limit retry budget for report submissions (HTTP 429)
    pub rate_limit_retries: u32,
    pub rate_limit_delay: Duration,

    /// Hard per-call ceiling for report validate/submit/status calls
    pub report_timeout: Duration,
    /// Relay validate/submit round-trip timeout
    pub relay_timeout: Duration,
    /// Facility poll round-trip timeout
    pub facility_timeout: Duration,

    /// Submission loop sleep when no eligible items exist
    pub submission_idle_poll: Duration,
    /// Reconciliation sleep when no stale gateway-timeout items exist
    pub sweep_idle_poll: Duration,
    /// Reconciliation sleep when no submitted items are ready to verify;
    /// deliberately longer to respect the report system's rate limits
    pub verify_idle_poll: Duration,

    /// Age past which a gateway-timeout status is swept
    pub stale_after: Duration,
    /// Age past which a not-found-yet report is reset to pending
    pub not_found_grace: Duration,

    /// Trailing window of facility transactions eligible for re-polling
    pub retrieval_window: Duration,
    /// Minimum age of the last poll before a transaction is re-queried
    pub retrieval_repoll_after: Duration,
    /// Pacing delay between consecutive facility polls
    pub retrieval_pacing: Duration,

    pub heartbeat_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/transient_dispatch_development".to_string(),
            report_base_url: "https://report.example.org/api".to_string(),
            report_api_key: String::new(),
            relay_base_url: "https://relay.example.org/api".to_string(),
            rate_limit_retries: 24,
            rate_limit_delay: Duration::from_secs(10),
            report_timeout: Duration::from_secs(30),
            relay_timeout: Duration::from_secs(5),
            facility_timeout: Duration::from_secs(5),
            submission_idle_poll: Duration::from_secs(5),
            sweep_idle_poll: Duration::from_secs(5),
            verify_idle_poll: Duration::from_secs(25),
            stale_after: Duration::from_secs(300),
            not_found_grace: Duration::from_secs(300),
            retrieval_window: Duration::from_secs(3 * 24 * 3600),
            retrieval_repoll_after: Duration::from_secs(300),
            retrieval_pacing: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(url) = std::env::var("DISPATCH_REPORT_URL") {
            config.report_base_url = url;
        }
        if let Ok(key) = std::env::var("DISPATCH_REPORT_API_KEY") {
            config.report_api_key = key;
        }
        if let Ok(url) = std::env::var("DISPATCH_RELAY_URL") {
            config.relay_base_url = url;
        }
        if let Ok(raw) = std::env::var("DISPATCH_RATE_LIMIT_RETRIES") {
            config.rate_limit_retries = raw.parse().map_err(|e| {
                DispatchError::Configuration(format!("Invalid rate_limit_retries: {e}"))
            })?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_RATE_LIMIT_DELAY_SECS") {
            config.rate_limit_delay = parse_secs("rate_limit_delay", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_SUBMISSION_IDLE_POLL_SECS") {
            config.submission_idle_poll = parse_secs("submission_idle_poll", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_SWEEP_IDLE_POLL_SECS") {
            config.sweep_idle_poll = parse_secs("sweep_idle_poll", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_VERIFY_IDLE_POLL_SECS") {
            config.verify_idle_poll = parse_secs("verify_idle_poll", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_STALE_AFTER_SECS") {
            config.stale_after = parse_secs("stale_after", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_NOT_FOUND_GRACE_SECS") {
            config.not_found_grace = parse_secs("not_found_grace", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_RETRIEVAL_WINDOW_SECS") {
            config.retrieval_window = parse_secs("retrieval_window", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_RETRIEVAL_REPOLL_SECS") {
            config.retrieval_repoll_after = parse_secs("retrieval_repoll_after", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_RETRIEVAL_PACING_SECS") {
            config.retrieval_pacing = parse_secs("retrieval_pacing", &raw)?;
        }
        if let Ok(raw) = std::env::var("DISPATCH_HEARTBEAT_SECS") {
            config.heartbeat_interval = parse_secs("heartbeat_interval", &raw)?;
        }

        Ok(config)
    }
}

fn parse_secs(field: &str, raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .parse()
        .map_err(|e| DispatchError::Configuration(format!("Invalid {field}: {e}")))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_source_behavior() {
        let config = DispatchConfig::default();
        assert_eq!(config.rate_limit_retries, 24);
        assert_eq!(config.rate_limit_delay, Duration::from_secs(10));
        assert_eq!(config.submission_idle_poll, Duration::from_secs(5));
        assert_eq!(config.sweep_idle_poll, Duration::from_secs(5));
        assert_eq!(config.verify_idle_poll, Duration::from_secs(25));
        assert_eq!(config.stale_after, Duration::from_secs(300));
        assert_eq!(config.retrieval_window, Duration::from_secs(259200));
        assert_eq!(config.retrieval_pacing, Duration::from_secs(5));
        assert_eq!(config.relay_timeout, Duration::from_secs(5));
        assert_eq!(config.facility_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_secs_rejects_garbage() {
        assert!(parse_secs("stale_after", "not-a-number").is_err());
        assert_eq!(parse_secs("stale_after", "42").unwrap(), Duration::from_secs(42));
    }
}
