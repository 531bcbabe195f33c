//! # Status State Definitions
//!
//! Tagged status types for the three external systems. The database stores
//! statuses as strings with prefix conventions (`"Error: ..."`,
//! `"complete <note>"`); these enums round-trip that vocabulary losslessly
//! while making illegal states unrepresentable in the loops. Free-form
//! human-readable detail lives in explicit payload fields rather than in
//! the tag itself.

use crate::constants::{status, GATEWAY_TIMEOUT_SENTINEL};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Report clearinghouse status for one submission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    /// Eligible for the dispatch loop to claim
    Pending,
    /// Claimed by a dispatch loop; external I/O may be in flight
    Processing,
    /// Accepted by the report system, external id assigned; awaiting the
    /// reconciliation loop. The note carries any warning the report system
    /// attached to the acknowledgment.
    Submitted { note: Option<String> },
    /// Reconciliation determined the object already carries the expected
    /// markers for this request even though the explicit reply was lost
    Confirmed,
    /// Explicitly confirmed by the report system, note preserved from the
    /// submitted acknowledgment
    Complete { note: Option<String> },
    /// Terminal failure; free text explains the reason
    Error { reason: String },
    /// A string outside the recognized vocabulary, preserved verbatim
    Unrecognized(String),
}

impl ReportStatus {
    /// Parse the stored string form. Never fails: strings outside the
    /// vocabulary are preserved as [`ReportStatus::Unrecognized`].
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            status::PENDING => return Self::Pending,
            status::PROCESSING => return Self::Processing,
            status::CONFIRMED => return Self::Confirmed,
            status::SUBMITTED => return Self::Submitted { note: None },
            status::COMPLETE => return Self::Complete { note: None },
            _ => {}
        }
        if let Some(rest) = trimmed.strip_prefix(status::SUBMITTED) {
            if rest.starts_with(' ') {
                return Self::Submitted {
                    note: Some(rest.trim().to_string()),
                };
            }
        }
        if let Some(rest) = trimmed.strip_prefix(status::COMPLETE) {
            if rest.starts_with(' ') {
                return Self::Complete {
                    note: Some(rest.trim().to_string()),
                };
            }
        }
        if let Some(rest) = trimmed.strip_prefix(status::ERROR_PREFIX) {
            return Self::Error {
                reason: rest.trim().to_string(),
            };
        }
        Self::Unrecognized(trimmed.to_string())
    }

    /// Terminal states admit no further automatic transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Complete { .. } | Self::Error { .. })
    }

    /// States counted as a successful submission for the newest-wins rule
    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            Self::Submitted { .. } | Self::Confirmed | Self::Complete { .. }
        )
    }

    /// Whether the stored string carries the lost-at-gateway sentinel
    pub fn contains_gateway_timeout(&self) -> bool {
        self.to_string().contains(GATEWAY_TIMEOUT_SENTINEL)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "{}", status::PENDING),
            Self::Processing => write!(f, "{}", status::PROCESSING),
            Self::Submitted { note: None } => write!(f, "{}", status::SUBMITTED),
            Self::Submitted { note: Some(n) } => write!(f, "{} {}", status::SUBMITTED, n),
            Self::Confirmed => write!(f, "{}", status::CONFIRMED),
            Self::Complete { note: None } => write!(f, "{}", status::COMPLETE),
            Self::Complete { note: Some(n) } => write!(f, "{} {}", status::COMPLETE, n),
            Self::Error { reason } => write!(f, "{} {}", status::ERROR_PREFIX, reason),
            Self::Unrecognized(s) => write!(f, "{s}"),
        }
    }
}

impl Default for ReportStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Alert relay status for one submission request.
///
/// The relay acknowledgment is synchronous, so there is no reconciliation
/// vocabulary here: `Submitted` and `Rejected` are both terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayStatus {
    Pending,
    Processing,
    Submitted,
    /// Rejected by relay-side validation; details preserved
    Rejected { details: String },
    /// Terminal failure outside relay validation (transport, shared
    /// string-building failures)
    Error { reason: String },
    Unrecognized(String),
}

impl RelayStatus {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            status::PENDING => return Self::Pending,
            status::PROCESSING => return Self::Processing,
            status::SUBMITTED => return Self::Submitted,
            _ => {}
        }
        if let Some(rest) = trimmed.strip_prefix(status::REJECTED_PREFIX) {
            return Self::Rejected {
                details: rest.trim().to_string(),
            };
        }
        if let Some(rest) = trimmed.strip_prefix(status::ERROR_PREFIX) {
            return Self::Error {
                reason: rest.trim().to_string(),
            };
        }
        Self::Unrecognized(trimmed.to_string())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::Rejected { .. } | Self::Error { .. }
        )
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "{}", status::PENDING),
            Self::Processing => write!(f, "{}", status::PROCESSING),
            Self::Submitted => write!(f, "{}", status::SUBMITTED),
            Self::Rejected { details } => write!(f, "{} {}", status::REJECTED_PREFIX, details),
            Self::Error { reason } => write!(f, "{} {}", status::ERROR_PREFIX, reason),
            Self::Unrecognized(s) => write!(f, "{s}"),
        }
    }
}

impl Default for RelayStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Facility transaction status for the retrieval pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacilityStatus {
    Pending,
    Complete,
    /// Terminal failure, `"error: ..."` prefix convention
    Error { reason: String },
    /// Free-form progress note from the facility; transaction keeps polling
    Note(String),
}

impl FacilityStatus {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            status::PENDING => return Self::Pending,
            status::COMPLETE => return Self::Complete,
            _ => {}
        }
        if let Some(rest) = trimmed.strip_prefix(status::FACILITY_ERROR_PREFIX) {
            return Self::Error {
                reason: rest.trim().to_string(),
            };
        }
        Self::Note(trimmed.to_string())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error { .. })
    }
}

impl fmt::Display for FacilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "{}", status::PENDING),
            Self::Complete => write!(f, "{}", status::COMPLETE),
            Self::Error { reason } => write!(f, "{} {}", status::FACILITY_ERROR_PREFIX, reason),
            Self::Note(s) => write!(f, "{s}"),
        }
    }
}

impl Default for FacilityStatus {
    fn default() -> Self {
        Self::Pending
    }
}
