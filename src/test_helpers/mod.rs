//! # Test Helpers
//!
//! In-memory implementations of the store traits and a recording
//! notification sink, used by the integration tests to exercise loop
//! semantics without a Postgres instance. Claim atomicity is provided by
//! a single mutex around the whole claim operation, mirroring the
//! row-lock semantics of the Postgres store.

use crate::error::{DispatchError, Result};
use crate::models::{
    Author, FacilityTransactionRequest, NewFacilityTransactionRequest, NewSubmissionRequest,
    ObjectCoords, PhotometryPoint, SharingService, SubmissionRequest,
};
use crate::notify::{Notification, NotificationSink};
use crate::state_machine::{FacilityStatus, RelayStatus, ReportStatus};
use crate::store::{FacilityStore, SubmissionStore};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryInner {
    next_request_id: i64,
    next_transaction_id: i64,
    requests: Vec<SubmissionRequest>,
    services: HashMap<i64, SharingService>,
    coords: HashMap<String, ObjectCoords>,
    photometry: HashMap<String, Vec<PhotometryPoint>>,
    users: HashMap<i64, Author>,
    markers: HashSet<(String, i64)>,
    transactions: Vec<FacilityTransactionRequest>,
    followup_statuses: HashMap<i64, String>,
    persisted_photometry: HashMap<String, Vec<PhotometryPoint>>,
}

/// In-memory store implementing both store traits
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn side_claimable(status: &str, modified_at: NaiveDateTime, at: NaiveDateTime) -> bool {
    status == crate::constants::status::PENDING
        || (status == crate::constants::status::PROCESSING
            && modified_at + chrono::Duration::seconds(crate::constants::CLAIM_LEASE_SECONDS) < at)
}

/// Mirrors the claim predicate of the Postgres store: pending sides are
/// always claimable, processing sides only once their lease has lapsed
fn request_claimable(r: &SubmissionRequest, at: NaiveDateTime) -> bool {
    (r.publish_to_report_system
        && r.external_submission_id.is_none()
        && side_claimable(&r.report_status, r.modified_at, at))
        || (r.publish_to_relay_system && side_claimable(&r.relay_status, r.modified_at, at))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_service(&self, service: SharingService) {
        let mut inner = self.inner.lock().await;
        inner.services.insert(service.id, service);
    }

    pub async fn add_object(&self, coords: ObjectCoords, photometry: Vec<PhotometryPoint>) {
        let mut inner = self.inner.lock().await;
        inner.photometry.insert(coords.obj_id.clone(), photometry);
        inner.coords.insert(coords.obj_id.clone(), coords);
    }

    pub async fn add_user(&self, id: i64, author: Author) {
        let mut inner = self.inner.lock().await;
        inner.users.insert(id, author);
    }

    pub async fn set_object_markers(&self, obj_id: &str, sharing_service_id: i64) {
        let mut inner = self.inner.lock().await;
        inner.markers.insert((obj_id.to_string(), sharing_service_id));
    }

    /// Insert with an explicit creation timestamp, for ordering tests
    pub async fn insert_with_created_at(
        &self,
        request: NewSubmissionRequest,
        created_at: NaiveDateTime,
    ) -> Result<SubmissionRequest> {
        request.validate()?;
        let mut inner = self.inner.lock().await;
        inner.next_request_id += 1;
        let row = SubmissionRequest {
            id: inner.next_request_id,
            obj_id: request.obj_id,
            sharing_service_id: request.sharing_service_id,
            user_id: request.user_id,
            publish_to_report_system: request.publish_to_report_system,
            publish_to_relay_system: request.publish_to_relay_system,
            report_status: ReportStatus::Pending.to_string(),
            relay_status: RelayStatus::Pending.to_string(),
            external_submission_id: None,
            payload: None,
            response: None,
            archival: request.archival,
            archival_comment: request.archival_comment,
            publishers: None,
            remarks: None,
            photometry_options: request.photometry_options,
            created_at,
            modified_at: created_at,
        };
        inner.requests.push(row.clone());
        Ok(row)
    }

    /// Force a row into a specific state, for reconciliation tests
    pub async fn set_request_state(
        &self,
        id: i64,
        report_status: &str,
        external_id: Option<&str>,
        modified_at: NaiveDateTime,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        row.report_status = report_status.to_string();
        row.external_submission_id = external_id.map(str::to_string);
        row.modified_at = modified_at;
        Ok(())
    }

    pub async fn insert_transaction_with_created_at(
        &self,
        txn: NewFacilityTransactionRequest,
        created_at: NaiveDateTime,
    ) -> FacilityTransactionRequest {
        let mut inner = self.inner.lock().await;
        inner.next_transaction_id += 1;
        let row = FacilityTransactionRequest {
            id: inner.next_transaction_id,
            followup_request_id: txn.followup_request_id,
            obj_id: txn.obj_id,
            facility_name: txn.facility_name,
            method: txn.method,
            endpoint: txn.endpoint,
            headers: txn.headers,
            params: txn.params,
            body: txn.body,
            status: FacilityStatus::Pending.to_string(),
            last_query: None,
            created_at,
            modified_at: created_at,
        };
        inner.transactions.push(row.clone());
        row
    }

    pub async fn transaction(&self, id: i64) -> Option<FacilityTransactionRequest> {
        let inner = self.inner.lock().await;
        inner.transactions.iter().find(|t| t.id == id).cloned()
    }

    pub async fn followup_status(&self, followup_request_id: i64) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.followup_statuses.get(&followup_request_id).cloned()
    }

    pub async fn persisted_photometry(&self, obj_id: &str) -> Vec<PhotometryPoint> {
        let inner = self.inner.lock().await;
        inner
            .persisted_photometry
            .get(obj_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn claim_next_eligible(&self) -> Result<Option<SubmissionRequest>> {
        let mut inner = self.inner.lock().await;
        let at = now();
        let candidate_id = inner
            .requests
            .iter()
            .filter(|r| request_claimable(r, at))
            .min_by_key(|r| (r.created_at, r.id))
            .map(|r| r.id);
        let Some(id) = candidate_id else {
            return Ok(None);
        };
        let row = inner
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        if row.publish_to_report_system
            && row.external_submission_id.is_none()
            && side_claimable(&row.report_status, row.modified_at, at)
        {
            row.report_status = ReportStatus::Processing.to_string();
        }
        if row.publish_to_relay_system && side_claimable(&row.relay_status, row.modified_at, at) {
            row.relay_status = RelayStatus::Processing.to_string();
        }
        row.modified_at = at;
        Ok(Some(row.clone()))
    }

    async fn get(&self, id: i64) -> Result<Option<SubmissionRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn insert(&self, request: NewSubmissionRequest) -> Result<SubmissionRequest> {
        self.insert_with_created_at(request, now()).await
    }

    async fn sharing_service(&self, id: i64) -> Result<Option<SharingService>> {
        let inner = self.inner.lock().await;
        Ok(inner.services.get(&id).cloned())
    }

    async fn update_report_status(&self, id: i64, status: &ReportStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        row.report_status = status.to_string();
        row.modified_at = now();
        Ok(())
    }

    async fn update_relay_status(&self, id: i64, status: &RelayStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        row.relay_status = status.to_string();
        row.modified_at = now();
        Ok(())
    }

    async fn set_external_id(&self, id: i64, external_id: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        row.external_submission_id = external_id.map(str::to_string);
        row.modified_at = now();
        Ok(())
    }

    async fn record_audit(
        &self,
        id: i64,
        payload: Option<&Value>,
        response: Option<&Value>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        if let Some(payload) = payload {
            row.payload = Some(payload.clone());
        }
        if let Some(response) = response {
            row.response = Some(response.clone());
        }
        row.modified_at = now();
        Ok(())
    }

    async fn cache_publish_strings(&self, id: i64, publishers: &str, remarks: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        row.publishers = Some(publishers.to_string());
        row.remarks = Some(remarks.to_string());
        row.modified_at = now();
        Ok(())
    }

    async fn next_submitted_for_verification(&self) -> Result<Option<SubmissionRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .requests
            .iter()
            .filter(|r| {
                matches!(r.report_status(), ReportStatus::Submitted { .. })
                    && r.external_submission_id.is_some()
                    && !inner
                        .services
                        .get(&r.sharing_service_id)
                        .map(|s| s.testing)
                        .unwrap_or(false)
            })
            .min_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn stale_gateway_timeouts(&self, cutoff: NaiveDateTime) -> Result<Vec<SubmissionRequest>> {
        let inner = self.inner.lock().await;
        let mut stale: Vec<SubmissionRequest> = inner
            .requests
            .iter()
            .filter(|r| r.report_status().contains_gateway_timeout() && r.modified_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.created_at, r.id));
        Ok(stale)
    }

    async fn newer_successful_exists(
        &self,
        obj_id: &str,
        sharing_service_id: i64,
        created_after: NaiveDateTime,
    ) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.requests.iter().any(|r| {
            r.obj_id == obj_id
                && r.sharing_service_id == sharing_service_id
                && r.created_at > created_after
                && r.report_status().is_successful()
        }))
    }

    async fn object_coords(&self, obj_id: &str) -> Result<Option<ObjectCoords>> {
        let inner = self.inner.lock().await;
        Ok(inner.coords.get(obj_id).cloned())
    }

    async fn photometry_for(&self, obj_id: &str) -> Result<Vec<PhotometryPoint>> {
        let inner = self.inner.lock().await;
        Ok(inner.photometry.get(obj_id).cloned().unwrap_or_default())
    }

    async fn requester(&self, user_id: i64) -> Result<Option<Author>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&user_id).cloned())
    }

    async fn object_carries_markers(&self, obj_id: &str, sharing_service_id: i64) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .markers
            .contains(&(obj_id.to_string(), sharing_service_id)))
    }
}

#[async_trait]
impl FacilityStore for MemoryStore {
    async fn insert_transaction(
        &self,
        txn: NewFacilityTransactionRequest,
    ) -> Result<FacilityTransactionRequest> {
        Ok(self.insert_transaction_with_created_at(txn, now()).await)
    }

    async fn due_transactions(
        &self,
        window_start: NaiveDateTime,
        repoll_before: NaiveDateTime,
    ) -> Result<Vec<FacilityTransactionRequest>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<FacilityTransactionRequest> = inner
            .transactions
            .iter()
            .filter(|t| t.is_due(window_start, repoll_before))
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.created_at, t.id));
        Ok(due)
    }

    async fn update_transaction_status(&self, id: i64, status: &FacilityStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let txn = inner
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        txn.status = status.to_string();
        txn.last_query = Some(now());
        txn.modified_at = now();
        Ok(())
    }

    async fn touch_last_query(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let txn = inner
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(DispatchError::RequestNotFound(id))?;
        txn.last_query = Some(now());
        txn.modified_at = now();
        Ok(())
    }

    async fn sync_followup_status(&self, followup_request_id: i64, status: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .followup_statuses
            .insert(followup_request_id, status.to_string());
        Ok(())
    }

    async fn insert_photometry_dedup(
        &self,
        obj_id: &str,
        points: &[PhotometryPoint],
    ) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let existing = inner
            .persisted_photometry
            .entry(obj_id.to_string())
            .or_default();
        let mut inserted = 0usize;
        for point in points {
            let key = point.dedup_key();
            if existing.iter().any(|p| p.dedup_key() == key) {
                continue;
            }
            existing.push(point.clone());
            inserted += 1;
        }
        Ok(inserted)
    }
}

/// Notification sink recording everything it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn received(&self) -> Vec<Notification> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: Notification) {
        self.received.lock().await.push(notification);
    }
}
