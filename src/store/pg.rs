//! # Postgres Store Implementations
//!
//! sqlx-backed implementations of the store traits. Claims rely on
//! `FOR UPDATE SKIP LOCKED` so concurrent loop replicas never double-claim
//! an item; every other write is a single short transaction.

use crate::constants::GATEWAY_TIMEOUT_SENTINEL;
use crate::error::{DispatchError, Result};
use crate::models::{
    Author, FacilityTransactionRequest, NewFacilityTransactionRequest, NewSubmissionRequest,
    ObjectCoords, PhotometryPoint, SharingService, SubmissionRequest,
};
use crate::state_machine::{FacilityStatus, RelayStatus, ReportStatus};
use crate::store::{FacilityStore, SubmissionStore};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, instrument};

const SUBMISSION_COLUMNS: &str = "id, obj_id, sharing_service_id, user_id, \
     publish_to_report_system, publish_to_relay_system, report_status, relay_status, \
     external_submission_id, payload, response, archival, archival_comment, \
     publishers, remarks, photometry_options, created_at, modified_at";

const TRANSACTION_COLUMNS: &str = "id, followup_request_id, obj_id, facility_name, \
     method, endpoint, headers, params, body, status, last_query, created_at, modified_at";

/// Predicate selecting requests the dispatch loop may claim
/// Side claimability: pending sides always, processing sides only after
/// the claim lease has lapsed. In-flight rows carry a fresh `modified_at`
/// from their claim and are skipped by concurrent claimers.
fn eligible_predicate() -> String {
    format!(
        "(publish_to_report_system AND external_submission_id IS NULL \
           AND (report_status = 'pending' \
                OR (report_status = 'processing' \
                    AND modified_at < NOW() - INTERVAL '{lease} seconds'))) \
         OR (publish_to_relay_system \
           AND (relay_status = 'pending' \
                OR (relay_status = 'processing' \
                    AND modified_at < NOW() - INTERVAL '{lease} seconds')))",
        lease = crate::constants::CLAIM_LEASE_SECONDS
    )
}

fn db_err(operation: &str) -> impl FnOnce(sqlx::Error) -> DispatchError + '_ {
    move |e| DispatchError::database(operation, e)
}

#[derive(Debug, Clone)]
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    #[instrument(skip(self))]
    async fn claim_next_eligible(&self) -> Result<Option<SubmissionRequest>> {
        let mut tx = self.pool.begin().await.map_err(db_err("claim_begin"))?;

        let predicate = eligible_predicate();
        let query = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submission_requests \
             WHERE {predicate} \
             ORDER BY created_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED"
        );
        let candidate = sqlx::query_as::<_, SubmissionRequest>(&query)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("claim_select"))?;

        let Some(candidate) = candidate else {
            tx.commit().await.map_err(db_err("claim_commit"))?;
            return Ok(None);
        };

        // Flip each requested side to processing; this is the claim that
        // makes the row ineligible for concurrent re-selection
        sqlx::query(
            "UPDATE submission_requests SET \
               report_status = CASE WHEN publish_to_report_system \
                 AND report_status IN ('pending', 'processing') \
                 AND external_submission_id IS NULL \
                 THEN 'processing' ELSE report_status END, \
               relay_status = CASE WHEN publish_to_relay_system \
                 AND relay_status IN ('pending', 'processing') \
                 THEN 'processing' ELSE relay_status END, \
               modified_at = NOW() \
             WHERE id = $1",
        )
        .bind(candidate.id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("claim_update"))?;

        let query = format!("SELECT {SUBMISSION_COLUMNS} FROM submission_requests WHERE id = $1");
        let claimed = sqlx::query_as::<_, SubmissionRequest>(&query)
            .bind(candidate.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("claim_refetch"))?;

        tx.commit().await.map_err(db_err("claim_commit"))?;
        debug!(request_id = claimed.id, obj_id = %claimed.obj_id, "Claimed submission request");
        Ok(Some(claimed))
    }

    async fn get(&self, id: i64) -> Result<Option<SubmissionRequest>> {
        let query = format!("SELECT {SUBMISSION_COLUMNS} FROM submission_requests WHERE id = $1");
        sqlx::query_as::<_, SubmissionRequest>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get_submission_request"))
    }

    async fn insert(&self, request: NewSubmissionRequest) -> Result<SubmissionRequest> {
        request.validate()?;
        let query = format!(
            "INSERT INTO submission_requests ( \
               obj_id, sharing_service_id, user_id, publish_to_report_system, \
               publish_to_relay_system, report_status, relay_status, archival, \
               archival_comment, photometry_options, created_at, modified_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', 'pending', $6, $7, $8, NOW(), NOW()) \
             RETURNING {SUBMISSION_COLUMNS}"
        );
        sqlx::query_as::<_, SubmissionRequest>(&query)
            .bind(&request.obj_id)
            .bind(request.sharing_service_id)
            .bind(request.user_id)
            .bind(request.publish_to_report_system)
            .bind(request.publish_to_relay_system)
            .bind(request.archival)
            .bind(&request.archival_comment)
            .bind(&request.photometry_options)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("insert_submission_request"))
    }

    async fn sharing_service(&self, id: i64) -> Result<Option<SharingService>> {
        sqlx::query_as::<_, SharingService>(
            "SELECT id, name, testing, acknowledgments, source_group_id, bot_id, bot_name, \
                    coauthors, photometry_options, created_at, modified_at \
             FROM sharing_services WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get_sharing_service"))
    }

    async fn update_report_status(&self, id: i64, status: &ReportStatus) -> Result<()> {
        sqlx::query(
            "UPDATE submission_requests SET report_status = $2, modified_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err("update_report_status"))?;
        Ok(())
    }

    async fn update_relay_status(&self, id: i64, status: &RelayStatus) -> Result<()> {
        sqlx::query(
            "UPDATE submission_requests SET relay_status = $2, modified_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err("update_relay_status"))?;
        Ok(())
    }

    async fn set_external_id(&self, id: i64, external_id: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE submission_requests SET external_submission_id = $2, modified_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(db_err("set_external_id"))?;
        Ok(())
    }

    async fn record_audit(
        &self,
        id: i64,
        payload: Option<&Value>,
        response: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE submission_requests SET \
               payload = COALESCE($2, payload), \
               response = COALESCE($3, response), \
               modified_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(payload)
        .bind(response)
        .execute(&self.pool)
        .await
        .map_err(db_err("record_audit"))?;
        Ok(())
    }

    async fn cache_publish_strings(&self, id: i64, publishers: &str, remarks: &str) -> Result<()> {
        sqlx::query(
            "UPDATE submission_requests SET publishers = $2, remarks = $3, modified_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(publishers)
        .bind(remarks)
        .execute(&self.pool)
        .await
        .map_err(db_err("cache_publish_strings"))?;
        Ok(())
    }

    async fn next_submitted_for_verification(&self) -> Result<Option<SubmissionRequest>> {
        let query = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submission_requests r \
             WHERE (r.report_status = 'submitted' OR r.report_status LIKE 'submitted %') \
               AND r.external_submission_id IS NOT NULL \
               AND NOT EXISTS ( \
                 SELECT 1 FROM sharing_services s \
                 WHERE s.id = r.sharing_service_id AND s.testing) \
             ORDER BY r.created_at ASC LIMIT 1"
        );
        sqlx::query_as::<_, SubmissionRequest>(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("next_submitted_for_verification"))
    }

    async fn stale_gateway_timeouts(&self, cutoff: NaiveDateTime) -> Result<Vec<SubmissionRequest>> {
        let query = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submission_requests \
             WHERE report_status LIKE $1 AND modified_at < $2 \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, SubmissionRequest>(&query)
            .bind(format!("%{GATEWAY_TIMEOUT_SENTINEL}%"))
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("stale_gateway_timeouts"))
    }

    async fn newer_successful_exists(
        &self,
        obj_id: &str,
        sharing_service_id: i64,
        created_after: NaiveDateTime,
    ) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS ( \
               SELECT 1 FROM submission_requests \
               WHERE obj_id = $1 AND sharing_service_id = $2 AND created_at > $3 \
                 AND (report_status = 'submitted' OR report_status LIKE 'submitted %' \
                   OR report_status = 'confirmed' \
                   OR report_status = 'complete' OR report_status LIKE 'complete %'))",
        )
        .bind(obj_id)
        .bind(sharing_service_id)
        .bind(created_after)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("newer_successful_exists"))?;
        Ok(row.0)
    }

    async fn object_coords(&self, obj_id: &str) -> Result<Option<ObjectCoords>> {
        sqlx::query_as::<_, ObjectCoords>("SELECT id AS obj_id, ra, dec FROM objects WHERE id = $1")
            .bind(obj_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("object_coords"))
    }

    async fn photometry_for(&self, obj_id: &str) -> Result<Vec<PhotometryPoint>> {
        sqlx::query_as::<_, PhotometryPoint>(
            "SELECT mjd, filter, mag, magerr, limiting_mag, stream_name, origin \
             FROM photometry WHERE obj_id = $1 ORDER BY mjd ASC",
        )
        .bind(obj_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("photometry_for"))
    }

    async fn requester(&self, user_id: i64) -> Result<Option<Author>> {
        sqlx::query_as::<_, Author>(
            "SELECT given_name, family_name, affiliation FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("requester"))
    }

    async fn object_carries_markers(&self, obj_id: &str, sharing_service_id: i64) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS ( \
               SELECT 1 FROM object_report_markers \
               WHERE obj_id = $1 AND sharing_service_id = $2)",
        )
        .bind(obj_id)
        .bind(sharing_service_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("object_carries_markers"))?;
        Ok(row.0)
    }
}

#[derive(Debug, Clone)]
pub struct PgFacilityStore {
    pool: PgPool,
}

impl PgFacilityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FacilityStore for PgFacilityStore {
    async fn insert_transaction(
        &self,
        txn: NewFacilityTransactionRequest,
    ) -> Result<FacilityTransactionRequest> {
        let query = format!(
            "INSERT INTO facility_transaction_requests ( \
               followup_request_id, obj_id, facility_name, method, endpoint, \
               headers, params, body, status, created_at, modified_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', NOW(), NOW()) \
             RETURNING {TRANSACTION_COLUMNS}"
        );
        sqlx::query_as::<_, FacilityTransactionRequest>(&query)
            .bind(txn.followup_request_id)
            .bind(&txn.obj_id)
            .bind(&txn.facility_name)
            .bind(&txn.method)
            .bind(&txn.endpoint)
            .bind(&txn.headers)
            .bind(&txn.params)
            .bind(&txn.body)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("insert_transaction"))
    }

    async fn due_transactions(
        &self,
        window_start: NaiveDateTime,
        repoll_before: NaiveDateTime,
    ) -> Result<Vec<FacilityTransactionRequest>> {
        let query = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM facility_transaction_requests \
             WHERE status <> 'complete' AND status NOT LIKE 'error:%' \
               AND created_at >= $1 \
               AND (last_query IS NULL OR last_query < $2 OR last_query = created_at) \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, FacilityTransactionRequest>(&query)
            .bind(window_start)
            .bind(repoll_before)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("due_transactions"))
    }

    async fn update_transaction_status(&self, id: i64, status: &FacilityStatus) -> Result<()> {
        sqlx::query(
            "UPDATE facility_transaction_requests \
             SET status = $2, last_query = NOW(), modified_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err("update_transaction_status"))?;
        Ok(())
    }

    async fn touch_last_query(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE facility_transaction_requests \
             SET last_query = NOW(), modified_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err("touch_last_query"))?;
        Ok(())
    }

    async fn sync_followup_status(&self, followup_request_id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE followup_requests SET status = $2, modified_at = NOW() WHERE id = $1")
            .bind(followup_request_id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(db_err("sync_followup_status"))?;
        Ok(())
    }

    async fn insert_photometry_dedup(
        &self,
        obj_id: &str,
        points: &[PhotometryPoint],
    ) -> Result<usize> {
        let mut inserted = 0usize;
        for point in points {
            // IS NOT DISTINCT FROM treats NULL brightness pairs as equal,
            // so a re-ingested non-detection is still suppressed
            let result = sqlx::query(
                "INSERT INTO photometry \
                   (obj_id, mjd, filter, mag, magerr, limiting_mag, stream_name, origin) \
                 SELECT $1, $2, $3, $4, $5, $6, $7, $8 \
                 WHERE NOT EXISTS ( \
                   SELECT 1 FROM photometry \
                   WHERE obj_id = $1 AND mjd = $2 AND filter = $3 \
                     AND mag IS NOT DISTINCT FROM $4 \
                     AND magerr IS NOT DISTINCT FROM $5)",
            )
            .bind(obj_id)
            .bind(point.mjd)
            .bind(&point.filter)
            .bind(point.mag)
            .bind(point.magerr)
            .bind(point.limiting_mag)
            .bind(&point.stream_name)
            .bind(&point.origin)
            .execute(&self.pool)
            .await
            .map_err(db_err("insert_photometry_dedup"))?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }
}
