//! # Status Transitions
//!
//! Pure `(state, event) -> state` functions defining every legal edge of
//! the per-system status machines. The dispatch and reconciliation loops
//! never assign statuses directly; they raise events here so the legal
//! vocabulary stays in one place and illegal edges fail loudly.

use super::states::{RelayStatus, ReportStatus};
use crate::constants::OUTRANKED_DETAIL;
use crate::error::TransitionError;

/// Events applied to the report-system status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    /// Dispatch loop claims the item before any external I/O
    Claim,
    /// Report system acknowledged the submission and assigned an id; any
    /// warning text from the acknowledgment rides along
    Acknowledged { note: Option<String> },
    /// Validation or transport failure during submission
    SubmissionFailed { reason: String },
    /// Service is in testing mode: payload validated remotely but never
    /// submitted, so the item completes without an external id
    TestingValidated,
    /// Reconciliation: an identical report already exists at the clearinghouse
    VerifiedExisting,
    /// Reconciliation: explicit confirmation with a source name
    VerifiedConfirmed,
    /// Reconciliation: object already carries the expected markers even
    /// though the explicit status reply was lost
    MarkersMatched,
    /// Reconciliation: report genuinely not found after the grace period
    NotFoundExpired,
    /// Reconciliation: status-check endpoint returned an error
    VerificationFailed { reason: String },
    /// Stale sweep: gateway-timeout item reset for re-submission
    StaleReset,
    /// Stale sweep: a newer request for the same object+service succeeded
    Outranked,
}

impl ReportEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Acknowledged { .. } => "acknowledged",
            Self::SubmissionFailed { .. } => "submission_failed",
            Self::TestingValidated => "testing_validated",
            Self::VerifiedExisting => "verified_existing",
            Self::VerifiedConfirmed => "verified_confirmed",
            Self::MarkersMatched => "markers_matched",
            Self::NotFoundExpired => "not_found_expired",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::StaleReset => "stale_reset",
            Self::Outranked => "outranked",
        }
    }
}

/// Compute the next report status, or fail on an illegal edge
pub fn next_report_status(
    current: &ReportStatus,
    event: &ReportEvent,
) -> Result<ReportStatus, TransitionError> {
    use ReportEvent as E;
    use ReportStatus as S;

    let next = match (current, event) {
        (S::Pending | S::Processing, E::Claim) => S::Processing,

        (S::Processing, E::Acknowledged { note }) => S::Submitted { note: note.clone() },
        (S::Processing, E::SubmissionFailed { reason }) => S::Error {
            reason: reason.clone(),
        },
        (S::Processing, E::TestingValidated) => S::Complete {
            note: Some("testing mode; validated but not submitted".to_string()),
        },

        (S::Submitted { .. }, E::VerifiedExisting) => S::Complete { note: None },
        // Warning suffix from the acknowledgment is preserved on completion
        (S::Submitted { note }, E::VerifiedConfirmed) => S::Complete { note: note.clone() },
        (S::Submitted { .. }, E::MarkersMatched) => S::Confirmed,
        (S::Submitted { .. }, E::NotFoundExpired) => S::Pending,
        (S::Submitted { .. }, E::VerificationFailed { reason }) => S::Error {
            reason: reason.clone(),
        },

        // Sweep edges require the gateway-timeout sentinel in the stored string
        (s, E::StaleReset) if s.contains_gateway_timeout() => S::Pending,
        (s, E::Outranked) if s.contains_gateway_timeout() => S::Error {
            reason: OUTRANKED_DETAIL.to_string(),
        },

        (from, event) => {
            return Err(TransitionError::Illegal {
                system: "report",
                from: from.to_string(),
                event: event.name().to_string(),
            })
        }
    };
    Ok(next)
}

/// Events applied to the relay-system status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Claim,
    /// Relay accepted the message synchronously
    Acknowledged,
    /// Relay-side validation rejected the message
    Rejected { details: String },
    /// Transport failure or shared string-building failure
    Failed { reason: String },
}

impl RelayEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Acknowledged => "acknowledged",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Compute the next relay status, or fail on an illegal edge
pub fn next_relay_status(
    current: &RelayStatus,
    event: &RelayEvent,
) -> Result<RelayStatus, TransitionError> {
    use RelayEvent as E;
    use RelayStatus as S;

    let next = match (current, event) {
        (S::Pending | S::Processing, E::Claim) => S::Processing,
        (S::Processing, E::Acknowledged) => S::Submitted,
        (S::Processing, E::Rejected { details }) => S::Rejected {
            details: details.clone(),
        },
        (S::Processing, E::Failed { reason }) => S::Error {
            reason: reason.clone(),
        },
        (from, event) => {
            return Err(TransitionError::Illegal {
                system: "relay",
                from: from.to_string(),
                event: event.name().to_string(),
            })
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitted(note: Option<&str>) -> ReportStatus {
        ReportStatus::Submitted {
            note: note.map(str::to_string),
        }
    }

    #[test]
    fn test_report_happy_path() {
        let s = next_report_status(&ReportStatus::Pending, &ReportEvent::Claim).unwrap();
        assert_eq!(s, ReportStatus::Processing);

        let s = next_report_status(
            &s,
            &ReportEvent::Acknowledged {
                note: Some("WARNING: near duplicate".into()),
            },
        )
        .unwrap();
        assert_eq!(s, submitted(Some("WARNING: near duplicate")));

        let s = next_report_status(&s, &ReportEvent::VerifiedConfirmed).unwrap();
        assert_eq!(
            s,
            ReportStatus::Complete {
                note: Some("WARNING: near duplicate".into())
            }
        );
    }

    #[test]
    fn test_reclaim_of_processing_item_is_legal() {
        // A crashed worker leaves "processing"; the next pass may re-claim it
        let s = next_report_status(&ReportStatus::Processing, &ReportEvent::Claim).unwrap();
        assert_eq!(s, ReportStatus::Processing);
    }

    #[test]
    fn test_testing_mode_completes_without_submission() {
        let s = next_report_status(&ReportStatus::Processing, &ReportEvent::TestingValidated)
            .unwrap();
        match s {
            ReportStatus::Complete { note: Some(note) } => {
                assert!(note.contains("testing mode"));
            }
            other => panic!("expected complete with note, got {other:?}"),
        }
        assert!(
            next_report_status(&ReportStatus::Pending, &ReportEvent::TestingValidated).is_err()
        );
    }

    #[test]
    fn test_not_found_resets_to_pending() {
        let s = next_report_status(&submitted(None), &ReportEvent::NotFoundExpired).unwrap();
        assert_eq!(s, ReportStatus::Pending);
    }

    #[test]
    fn test_markers_matched_confirms() {
        let s = next_report_status(&submitted(None), &ReportEvent::MarkersMatched).unwrap();
        assert_eq!(s, ReportStatus::Confirmed);
    }

    #[test]
    fn test_stale_reset_requires_sentinel() {
        let stuck = ReportStatus::parse("Error: Gateway Time-out");
        assert_eq!(
            next_report_status(&stuck, &ReportEvent::StaleReset).unwrap(),
            ReportStatus::Pending
        );

        let healthy = submitted(None);
        assert!(next_report_status(&healthy, &ReportEvent::StaleReset).is_err());
    }

    #[test]
    fn test_outranked_marks_error() {
        let stuck = ReportStatus::parse("submitted Gateway Time-out");
        let s = next_report_status(&stuck, &ReportEvent::Outranked).unwrap();
        match s {
            ReportStatus::Error { reason } => {
                assert!(reason.contains("superseded"));
            }
            other => panic!("expected error status, got {other:?}"),
        }
    }

    #[test]
    fn test_terminal_states_reject_further_events() {
        let complete = ReportStatus::Complete { note: None };
        assert!(next_report_status(&complete, &ReportEvent::VerifiedConfirmed).is_err());
        assert!(next_report_status(&complete, &ReportEvent::Claim).is_err());

        let confirmed = ReportStatus::Confirmed;
        assert!(next_report_status(&confirmed, &ReportEvent::NotFoundExpired).is_err());
    }

    #[test]
    fn test_relay_edges() {
        let s = next_relay_status(&RelayStatus::Pending, &RelayEvent::Claim).unwrap();
        assert_eq!(s, RelayStatus::Processing);
        assert_eq!(
            next_relay_status(&s, &RelayEvent::Acknowledged).unwrap(),
            RelayStatus::Submitted
        );
        assert_eq!(
            next_relay_status(
                &RelayStatus::Processing,
                &RelayEvent::Rejected {
                    details: "bad topic".into()
                }
            )
            .unwrap(),
            RelayStatus::Rejected {
                details: "bad topic".into()
            }
        );
        // No reconciliation vocabulary for the relay: submitted is terminal
        assert!(next_relay_status(&RelayStatus::Submitted, &RelayEvent::Acknowledged).is_err());
    }
}
