//! # Reconciliation Loop
//!
//! Closes the gap between what the engine believes and what the report
//! clearinghouse actually holds. Each cycle runs two passes:
//!
//! 1. Stale sweep: items whose status carries the gateway-timeout
//!    sentinel and which have not changed within the staleness threshold
//!    are reset to pending for re-submission, unless a newer request for
//!    the same object and service has already succeeded, in which case
//!    the stale item loses the race and is marked terminal.
//! 2. Verification: the oldest submitted item with an external id is
//!    checked against the status endpoint and its final status recorded.
//!
//! Verification deliberately idles longer than the sweep to respect the
//! clearinghouse rate limits.

use crate::clients::{ReportClient, ReportStatusReply};
use crate::config::DispatchConfig;
use crate::error::{ClientError, Result};
use crate::models::SubmissionRequest;
use crate::notify::{Notification, NotificationSink};
use crate::state_machine::{next_report_status, ReportEvent};
use crate::store::SubmissionStore;
use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::LoopControl;

pub struct ReconciliationLoop<S: SubmissionStore> {
    store: Arc<S>,
    report_client: ReportClient,
    notifier: Arc<dyn NotificationSink>,
    config: DispatchConfig,
    control: Arc<LoopControl>,
}

impl<S: SubmissionStore> ReconciliationLoop<S> {
    pub fn new(
        store: Arc<S>,
        report_client: ReportClient,
        notifier: Arc<dyn NotificationSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            report_client,
            notifier,
            config,
            control: LoopControl::new(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        if !self.control.start() {
            return Ok(());
        }
        info!(worker_id = %self.control.worker_id(), "Reconciliation loop started");

        while self.control.should_continue() {
            let worked = match self.process_cycle().await {
                Ok(worked) => worked,
                Err(e) => {
                    error!(worker_id = %self.control.worker_id(), error = %e,
                        "Reconciliation cycle failed");
                    false
                }
            };
            let idle = if worked {
                self.config.sweep_idle_poll
            } else {
                self.config.verify_idle_poll
            };
            self.control.idle_wait(idle).await;
        }

        self.control.mark_stopped();
        info!(worker_id = %self.control.worker_id(), "Reconciliation loop stopped");
        Ok(())
    }

    pub async fn stop(&self, timeout: std::time::Duration) {
        self.control.request_stop();
        self.control.await_stopped(timeout).await;
    }

    /// One sweep-then-verify cycle; true when either pass did work
    pub async fn process_cycle(&self) -> Result<bool> {
        let swept = self.sweep_stale(Utc::now().naive_utc()).await?;
        let verified = self.verify_one(Utc::now().naive_utc()).await?;
        Ok(swept > 0 || verified)
    }

    /// Reset or retire gateway-timeout items older than the staleness
    /// threshold. Returns the number of items handled.
    #[instrument(skip(self), fields(worker_id = %self.control.worker_id()))]
    pub async fn sweep_stale(&self, now: NaiveDateTime) -> Result<usize> {
        let cutoff = now - chrono::Duration::from_std(self.config.stale_after).unwrap_or_else(|_| chrono::Duration::zero());
        let stale = self.store.stale_gateway_timeouts(cutoff).await?;
        let handled = stale.len();

        for request in stale {
            let outranked = self
                .store
                .newer_successful_exists(
                    &request.obj_id,
                    request.sharing_service_id,
                    request.created_at,
                )
                .await?;

            let event = if outranked {
                ReportEvent::Outranked
            } else {
                ReportEvent::StaleReset
            };
            let next = next_report_status(&request.report_status(), &event)?;
            self.store.update_report_status(request.id, &next).await?;
            if !outranked {
                // Re-submission must allocate a fresh external id
                self.store.set_external_id(request.id, None).await?;
            }

            info!(
                request_id = request.id,
                obj_id = %request.obj_id,
                outranked,
                "Swept stale gateway-timeout item"
            );
            self.notifier
                .notify(Notification::ServiceRefresh {
                    sharing_service_id: request.sharing_service_id,
                })
                .await;
        }
        Ok(handled)
    }

    /// Verify the oldest submitted item. Returns false when none is ready.
    #[instrument(skip(self), fields(worker_id = %self.control.worker_id()))]
    pub async fn verify_one(&self, now: NaiveDateTime) -> Result<bool> {
        let Some(request) = self.store.next_submitted_for_verification().await? else {
            return Ok(false);
        };
        let Some(report_id) = request.external_submission_id.clone() else {
            // The selection predicate requires an external id; treat a
            // missing one as nothing to verify
            return Ok(false);
        };

        match self.report_client.check_status(&report_id).await {
            Ok(ReportStatusReply::IdenticalReportExists) => {
                self.finalize(&request, ReportEvent::VerifiedExisting).await?;
            }
            Ok(ReportStatusReply::ObjectCreated { name, .. })
            | Ok(ReportStatusReply::ExistingObject { name, .. }) => {
                self.finalize(&request, ReportEvent::VerifiedConfirmed).await?;
                self.notifier
                    .notify(Notification::ConfirmedName {
                        obj_id: request.obj_id.clone(),
                        name,
                    })
                    .await;
            }
            Ok(ReportStatusReply::NotFoundYet) => {
                return self.handle_not_found(&request, now).await;
            }
            Ok(ReportStatusReply::FieldErrors { raw }) => {
                self.store.record_audit(request.id, None, Some(&raw)).await?;
                self.finalize(
                    &request,
                    ReportEvent::VerificationFailed {
                        reason: "field errors reported by the clearinghouse".to_string(),
                    },
                )
                .await?;
            }
            Err(e) => {
                // Gateway timeouts land here as an unexpected response and
                // carry their sentinel into the status for the stale sweep
                warn!(request_id = request.id, error = %e, "Status check failed");
                if let ClientError::UnexpectedResponse { status, body } = &e {
                    let raw = serde_json::json!({ "status": status, "body": body });
                    self.store.record_audit(request.id, None, Some(&raw)).await?;
                }
                self.finalize(
                    &request,
                    ReportEvent::VerificationFailed {
                        reason: e.to_string(),
                    },
                )
                .await?;
            }
        }
        Ok(true)
    }

    async fn handle_not_found(
        &self,
        request: &SubmissionRequest,
        now: NaiveDateTime,
    ) -> Result<bool> {
        // The explicit reply may have been lost while the report still
        // landed; the object carrying the expected markers proves it
        if self
            .store
            .object_carries_markers(&request.obj_id, request.sharing_service_id)
            .await?
        {
            self.finalize(request, ReportEvent::MarkersMatched).await?;
            return Ok(true);
        }

        let grace =
            chrono::Duration::from_std(self.config.not_found_grace).unwrap_or_else(|_| chrono::Duration::zero());
        if request.modified_at < now - grace {
            info!(
                request_id = request.id,
                obj_id = %request.obj_id,
                "Report not found after grace period; resetting for re-submission"
            );
            self.finalize(request, ReportEvent::NotFoundExpired).await?;
            self.store.set_external_id(request.id, None).await?;
            return Ok(true);
        }

        // Within the grace period: leave submitted and try again later
        Ok(false)
    }

    async fn finalize(&self, request: &SubmissionRequest, event: ReportEvent) -> Result<()> {
        let next = next_report_status(&request.report_status(), &event)?;
        self.store.update_report_status(request.id, &next).await?;
        self.notifier
            .notify(Notification::ServiceRefresh {
                sharing_service_id: request.sharing_service_id,
            })
            .await;
        Ok(())
    }
}
