//! # System Constants
//!
//! Status vocabulary literals and sentinel substrings shared between the
//! state machine, the stores, and the dispatch loops. The database keeps
//! statuses as strings; these literals define the recognized vocabulary
//! that [`crate::state_machine`] round-trips through its tagged enums.

/// Recognized status literals for the per-system status columns
pub mod status {
    pub const PENDING: &str = "pending";
    pub const PROCESSING: &str = "processing";
    pub const SUBMITTED: &str = "submitted";
    pub const CONFIRMED: &str = "confirmed";
    pub const COMPLETE: &str = "complete";

    /// Terminal failure prefix for report/relay statuses, free text follows
    pub const ERROR_PREFIX: &str = "Error:";
    /// Terminal relay rejection prefix, free text follows
    pub const REJECTED_PREFIX: &str = "rejected:";
    /// Terminal facility transaction prefix, free text follows
    pub const FACILITY_ERROR_PREFIX: &str = "error:";
}

/// Lease, in seconds, held on a claimed (processing) side. A claim
/// refreshes `modified_at`, so a processing row stays invisible to
/// concurrent claimers until the lease lapses; a worker that died
/// mid-dispatch loses the lease and the row becomes claimable again.
pub const CLAIM_LEASE_SECONDS: i64 = 300;

/// Substring that marks a report submission whose acknowledgment was lost
/// at a gateway; such items are swept by the reconciliation loop once stale.
pub const GATEWAY_TIMEOUT_SENTINEL: &str = "Gateway Time-out";

/// Status detail written to a stale item that lost the newest-wins race
pub const OUTRANKED_DETAIL: &str = "superseded by a newer submission for this object and service";
