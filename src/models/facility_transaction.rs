//! # Facility Transaction Model
//!
//! One row per outstanding retrieval poll against a facility's
//! forced-photometry service. Created when a follow-up is first submitted
//! to a facility; polled repeatedly until the status becomes `complete` or
//! an `error:`-prefixed terminal string. The owning follow-up record's
//! human-readable status is kept in sync on every poll.

use crate::state_machine::FacilityStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FacilityTransactionRequest {
    pub id: i64,
    /// Owning follow-up record (one-to-one by current design)
    pub followup_request_id: i64,
    /// Object whose photometry this poll retrieves
    pub obj_id: String,
    /// Adapter registry key
    pub facility_name: String,
    /// Stored request tuple, replayed verbatim on every poll
    pub method: String,
    pub endpoint: String,
    pub headers: Option<serde_json::Value>,
    pub params: Option<serde_json::Value>,
    pub body: Option<serde_json::Value>,
    pub status: String,
    /// Timestamp of the last poll; equal to `created_at` (or null) when
    /// the transaction has never actually been re-queried
    pub last_query: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
}

/// Insert companion without generated fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFacilityTransactionRequest {
    pub followup_request_id: i64,
    pub obj_id: String,
    pub facility_name: String,
    pub method: String,
    pub endpoint: String,
    pub headers: Option<serde_json::Value>,
    pub params: Option<serde_json::Value>,
    pub body: Option<serde_json::Value>,
}

impl FacilityTransactionRequest {
    pub fn status(&self) -> FacilityStatus {
        FacilityStatus::parse(&self.status)
    }

    /// Due for a re-poll: not terminal, within the trailing window, and the
    /// last poll is missing, stale, or equal to the creation time (never
    /// actually re-queried).
    pub fn is_due(&self, window_start: NaiveDateTime, repoll_before: NaiveDateTime) -> bool {
        if self.status().is_terminal() || self.created_at < window_start {
            return false;
        }
        match self.last_query {
            None => true,
            Some(last) => last < repoll_before || last == self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn txn(status: &str, age_mins: i64, last_query_mins_ago: Option<i64>) -> FacilityTransactionRequest {
        let now = Utc::now().naive_utc();
        let created = now - Duration::minutes(age_mins);
        FacilityTransactionRequest {
            id: 1,
            followup_request_id: 10,
            obj_id: "AT2026abc".to_string(),
            facility_name: "atlas".to_string(),
            method: "GET".to_string(),
            endpoint: "https://facility.example.org/queue/42".to_string(),
            headers: None,
            params: None,
            body: None,
            status: status.to_string(),
            last_query: last_query_mins_ago.map(|m| now - Duration::minutes(m)),
            created_at: created,
            modified_at: created,
        }
    }

    #[test]
    fn test_due_predicate() {
        let now = Utc::now().naive_utc();
        let window_start = now - Duration::days(3);
        let repoll_before = now - Duration::minutes(5);

        // never polled
        assert!(txn("pending", 60, None).is_due(window_start, repoll_before));
        // polled recently
        assert!(!txn("pending", 60, Some(1)).is_due(window_start, repoll_before));
        // polled long ago
        assert!(txn("pending", 60, Some(30)).is_due(window_start, repoll_before));
        // terminal
        assert!(!txn("complete", 60, Some(30)).is_due(window_start, repoll_before));
        assert!(!txn("error: Zero records returned", 60, Some(30))
            .is_due(window_start, repoll_before));
        // outside the trailing window
        assert!(!txn("pending", 5 * 24 * 60, Some(30)).is_due(window_start, repoll_before));
    }

    #[test]
    fn test_last_query_equal_to_creation_counts_as_never_queried() {
        let now = Utc::now().naive_utc();
        let window_start = now - Duration::days(3);
        let repoll_before = now - Duration::minutes(5);

        let mut t = txn("pending", 2, None);
        t.last_query = Some(t.created_at);
        assert!(t.is_due(window_start, repoll_before));
    }
}
