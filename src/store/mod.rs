//! # Transactional Store
//!
//! Capability traits over the store that is simultaneously the work queue
//! and the durable audit trail. All coordination between loops (in this
//! process or another replica) is mediated here via claim-then-commit: a
//! loop reads a candidate, immediately writes the `processing` marker,
//! and commits before doing any external I/O. Each claim, each result
//! application, and each reconciliation decision is its own transaction.

pub mod pg;

use crate::error::Result;
use crate::models::{
    Author, FacilityTransactionRequest, NewFacilityTransactionRequest, NewSubmissionRequest,
    ObjectCoords, PhotometryPoint, SharingService, SubmissionRequest,
};
use crate::state_machine::{FacilityStatus, RelayStatus, ReportStatus};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;

pub use pg::{PgFacilityStore, PgSubmissionStore};

/// Store operations backing the submission and reconciliation loops
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Select the single oldest actionable request (FIFO by creation
    /// time), flip each requested side's status to `processing`, and
    /// commit - atomically, so a concurrent claimer cannot pick the same
    /// item. Returns the claimed row, or `None` when nothing is eligible.
    async fn claim_next_eligible(&self) -> Result<Option<SubmissionRequest>>;

    async fn get(&self, id: i64) -> Result<Option<SubmissionRequest>>;

    async fn insert(&self, request: NewSubmissionRequest) -> Result<SubmissionRequest>;

    async fn sharing_service(&self, id: i64) -> Result<Option<SharingService>>;

    async fn update_report_status(&self, id: i64, status: &ReportStatus) -> Result<()>;

    async fn update_relay_status(&self, id: i64, status: &RelayStatus) -> Result<()>;

    async fn set_external_id(&self, id: i64, external_id: Option<&str>) -> Result<()>;

    /// Store raw serialized request/response payloads for audit
    async fn record_audit(
        &self,
        id: i64,
        payload: Option<&Value>,
        response: Option<&Value>,
    ) -> Result<()>;

    /// Cache the computed reporter/remarks strings so retries reuse them
    async fn cache_publish_strings(&self, id: i64, publishers: &str, remarks: &str) -> Result<()>;

    /// Oldest request with report status exactly `submitted` and a
    /// non-null external id, excluding services in testing mode
    async fn next_submitted_for_verification(&self) -> Result<Option<SubmissionRequest>>;

    /// Requests whose report status carries the gateway-timeout sentinel
    /// and which were last modified before `cutoff`
    async fn stale_gateway_timeouts(&self, cutoff: NaiveDateTime) -> Result<Vec<SubmissionRequest>>;

    /// Whether a newer request for the same object and service has
    /// already reached a successful report status (newest-wins rule)
    async fn newer_successful_exists(
        &self,
        obj_id: &str,
        sharing_service_id: i64,
        created_after: NaiveDateTime,
    ) -> Result<bool>;

    async fn object_coords(&self, obj_id: &str) -> Result<Option<ObjectCoords>>;

    async fn photometry_for(&self, obj_id: &str) -> Result<Vec<PhotometryPoint>>;

    async fn requester(&self, user_id: i64) -> Result<Option<Author>>;

    /// Whether the object already carries the discoverer/reporting-group
    /// markers this service would have assigned on a successful report
    async fn object_carries_markers(&self, obj_id: &str, sharing_service_id: i64) -> Result<bool>;
}

/// Store operations backing the retrieval loop
#[async_trait]
pub trait FacilityStore: Send + Sync {
    async fn insert_transaction(
        &self,
        txn: NewFacilityTransactionRequest,
    ) -> Result<FacilityTransactionRequest>;

    /// Non-terminal transactions created within the trailing window that
    /// are due for a re-poll (never polled, stale, or last poll equal to
    /// creation time)
    async fn due_transactions(
        &self,
        window_start: NaiveDateTime,
        repoll_before: NaiveDateTime,
    ) -> Result<Vec<FacilityTransactionRequest>>;

    async fn update_transaction_status(&self, id: i64, status: &FacilityStatus) -> Result<()>;

    async fn touch_last_query(&self, id: i64) -> Result<()>;

    /// Keep the owning follow-up record's human-readable status in sync
    async fn sync_followup_status(&self, followup_request_id: i64, status: &str) -> Result<()>;

    /// Persist points, suppressing any whose identity key (timestamp,
    /// band, brightness, brightness error) already exists for the object.
    /// Returns the number of rows actually inserted.
    async fn insert_photometry_dedup(
        &self,
        obj_id: &str,
        points: &[PhotometryPoint],
    ) -> Result<usize>;
}
