//! # Submission Request Model
//!
//! One row per (object, sharing service, publish intent). Rows are created
//! by an upstream trigger in `pending` state for each intended system,
//! mutated only by the dispatch loop (pending -> processing -> terminal)
//! and the reconciliation loop, and never deleted: the table doubles as
//! the work queue and the durable audit trail.

use crate::error::{DispatchError, Result};
use crate::state_machine::{RelayStatus, ReportStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SubmissionRequest {
    pub id: i64,
    pub obj_id: String,
    pub sharing_service_id: i64,
    pub user_id: i64,
    /// Independent publish intents; at least one must be set
    pub publish_to_report_system: bool,
    pub publish_to_relay_system: bool,
    /// Per-system status strings in the recognized vocabulary
    pub report_status: String,
    pub relay_status: String,
    /// Assigned once the report system acknowledges receipt
    pub external_submission_id: Option<String>,
    /// Raw serialized request/response payloads kept for audit
    pub payload: Option<serde_json::Value>,
    pub response: Option<serde_json::Value>,
    /// Archival submission mode (no accompanying non-detection); requires
    /// a non-empty justification
    pub archival: bool,
    pub archival_comment: Option<String>,
    /// Reporter/author string and remarks, cached after first computation
    /// so retries do not recompute them
    pub publishers: Option<String>,
    pub remarks: Option<String>,
    /// Request-level photometry option overrides; merged over the service
    /// defaults with the request winning
    pub photometry_options: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub modified_at: NaiveDateTime,
}

/// Insert companion without generated fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmissionRequest {
    pub obj_id: String,
    pub sharing_service_id: i64,
    pub user_id: i64,
    pub publish_to_report_system: bool,
    pub publish_to_relay_system: bool,
    pub archival: bool,
    pub archival_comment: Option<String>,
    pub photometry_options: Option<serde_json::Value>,
}

impl NewSubmissionRequest {
    /// Enforce the row invariants before insertion
    pub fn validate(&self) -> Result<()> {
        if !self.publish_to_report_system && !self.publish_to_relay_system {
            return Err(DispatchError::Validation(
                "at least one publish intent must be set".to_string(),
            ));
        }
        if self.archival
            && self
                .archival_comment
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(DispatchError::Validation(
                "archival submissions require a non-empty justification".to_string(),
            ));
        }
        Ok(())
    }
}

impl SubmissionRequest {
    /// Parsed report-system status
    pub fn report_status(&self) -> ReportStatus {
        ReportStatus::parse(&self.report_status)
    }

    /// Parsed relay-system status
    pub fn relay_status(&self) -> RelayStatus {
        RelayStatus::parse(&self.relay_status)
    }

    /// Whether the report side still needs a dispatch pass
    pub fn report_side_eligible(&self) -> bool {
        self.publish_to_report_system
            && self.external_submission_id.is_none()
            && matches!(
                self.report_status(),
                ReportStatus::Pending | ReportStatus::Processing
            )
    }

    /// Whether the relay side still needs a dispatch pass
    pub fn relay_side_eligible(&self) -> bool {
        self.publish_to_relay_system
            && matches!(
                self.relay_status(),
                RelayStatus::Pending | RelayStatus::Processing
            )
    }

    /// Whether any side is still unresolved. Claim eligibility is stricter:
    /// a processing side is only re-claimable once its lease lapses.
    pub fn is_actionable(&self) -> bool {
        self.report_side_eligible() || self.relay_side_eligible()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request() -> SubmissionRequest {
        let now = Utc::now().naive_utc();
        SubmissionRequest {
            id: 1,
            obj_id: "AT2026abc".to_string(),
            sharing_service_id: 7,
            user_id: 3,
            publish_to_report_system: true,
            publish_to_relay_system: false,
            report_status: "pending".to_string(),
            relay_status: "pending".to_string(),
            external_submission_id: None,
            payload: None,
            response: None,
            archival: false,
            archival_comment: None,
            publishers: None,
            remarks: None,
            photometry_options: None,
            created_at: now,
            modified_at: now,
        }
    }

    #[test]
    fn test_eligibility_per_side() {
        let mut req = request();
        assert!(req.report_side_eligible());
        assert!(!req.relay_side_eligible());

        req.external_submission_id = Some("REP-99".to_string());
        assert!(!req.report_side_eligible());
        assert!(!req.is_actionable());

        req.publish_to_relay_system = true;
        assert!(req.relay_side_eligible());
        assert!(req.is_actionable());

        req.relay_status = "submitted".to_string();
        assert!(!req.relay_side_eligible());
    }

    #[test]
    fn test_new_request_invariants() {
        let valid = NewSubmissionRequest {
            obj_id: "AT2026abc".to_string(),
            sharing_service_id: 7,
            user_id: 3,
            publish_to_report_system: true,
            publish_to_relay_system: false,
            archival: false,
            archival_comment: None,
            photometry_options: None,
        };
        assert!(valid.validate().is_ok());

        let no_intent = NewSubmissionRequest {
            publish_to_report_system: false,
            ..valid.clone()
        };
        assert!(no_intent.validate().is_err());

        let archival_without_comment = NewSubmissionRequest {
            archival: true,
            archival_comment: Some("  ".to_string()),
            ..valid
        };
        assert!(archival_without_comment.validate().is_err());
    }
}
