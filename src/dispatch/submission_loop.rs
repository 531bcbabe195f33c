//! # Submission Loop
//!
//! Claims eligible submission requests oldest-first and dispatches each
//! claimed side to its external system. A claim is committed before any
//! external I/O, so concurrent loop instances never double-submit the
//! same item. The two sides of a dual-intent request are isolated after
//! the shared preparation step: a relay rejection never blocks the report
//! submission and vice versa. Every status written goes through the
//! transition functions in [`crate::state_machine`].

use crate::builder::{
    build_relay_message, build_remarks, build_report_content, build_reporter_string,
    merge_photometry_options, publishable_photometry, to_report_payload,
};
use crate::clients::{RelayClient, ReportClient};
use crate::config::DispatchConfig;
use crate::error::{ClientError, DispatchError, Result};
use crate::models::{SharingService, SubmissionRequest};
use crate::notify::{Notification, NotificationSink};
use crate::state_machine::{
    next_relay_status, next_report_status, RelayEvent, RelayStatus, ReportEvent, ReportStatus,
};
use crate::store::SubmissionStore;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::LoopControl;

pub struct SubmissionLoop<S: SubmissionStore> {
    store: Arc<S>,
    report_client: ReportClient,
    relay_client: RelayClient,
    notifier: Arc<dyn NotificationSink>,
    config: DispatchConfig,
    control: Arc<LoopControl>,
}

impl<S: SubmissionStore> SubmissionLoop<S> {
    pub fn new(
        store: Arc<S>,
        report_client: ReportClient,
        relay_client: RelayClient,
        notifier: Arc<dyn NotificationSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            report_client,
            relay_client,
            notifier,
            config,
            control: LoopControl::new(),
        }
    }

    /// Run until [`Self::stop`] is requested
    pub async fn run(&self) -> Result<()> {
        if !self.control.start() {
            return Ok(());
        }
        info!(worker_id = %self.control.worker_id(), "Submission loop started");

        while self.control.should_continue() {
            match self.process_one().await {
                Ok(true) => {}
                Ok(false) => self.control.idle_wait(self.config.submission_idle_poll).await,
                Err(e) => {
                    error!(worker_id = %self.control.worker_id(), error = %e,
                        "Submission iteration failed");
                    self.control.idle_wait(self.config.submission_idle_poll).await;
                }
            }
        }

        self.control.mark_stopped();
        info!(worker_id = %self.control.worker_id(), "Submission loop stopped");
        Ok(())
    }

    pub async fn stop(&self, timeout: std::time::Duration) {
        self.control.request_stop();
        self.control.await_stopped(timeout).await;
    }

    /// Claim and dispatch one item. Returns false when nothing is eligible.
    #[instrument(skip(self), fields(worker_id = %self.control.worker_id()))]
    pub async fn process_one(&self) -> Result<bool> {
        let Some(request) = self.store.claim_next_eligible().await? else {
            return Ok(false);
        };

        // Sides claimed this round: the claim flipped each eligible side
        // to processing before returning the row
        let report_side = request.publish_to_report_system
            && request.external_submission_id.is_none()
            && request.report_status() == ReportStatus::Processing;
        let relay_side =
            request.publish_to_relay_system && request.relay_status() == RelayStatus::Processing;

        info!(
            request_id = request.id,
            obj_id = %request.obj_id,
            report_side,
            relay_side,
            "Claimed submission request"
        );

        match self.prepare(&request).await {
            Ok(prepared) => {
                if relay_side {
                    self.dispatch_relay(&request, &prepared).await?;
                }
                if report_side {
                    self.dispatch_report(&request, &prepared).await?;
                }
            }
            Err(e) => {
                // Shared preparation failed; both claimed sides carry the
                // same terminal reason
                let reason = e.to_string();
                warn!(request_id = request.id, error = %reason, "Preparation failed");
                if report_side {
                    self.apply_report_event(
                        &request,
                        ReportEvent::SubmissionFailed {
                            reason: reason.clone(),
                        },
                    )
                    .await?;
                }
                if relay_side {
                    self.apply_relay_event(&request, RelayEvent::Failed { reason }).await?;
                }
            }
        }

        self.notifier
            .notify(Notification::ServiceRefresh {
                sharing_service_id: request.sharing_service_id,
            })
            .await;
        Ok(true)
    }

    /// Shared preparation: service config, requester, coordinates, report
    /// content, the publishable photometry subset, and the reporter/remarks
    /// strings. The strings are computed at most once per request lifetime;
    /// a retry reuses the cached values so a resubmission byte-matches the
    /// original and the external system can deduplicate it.
    async fn prepare(&self, request: &SubmissionRequest) -> Result<Prepared> {
        let service = self
            .store
            .sharing_service(request.sharing_service_id)
            .await?
            .ok_or(DispatchError::ServiceNotFound(request.sharing_service_id))?;
        let requester = self
            .store
            .requester(request.user_id)
            .await?
            .ok_or_else(|| {
                DispatchError::Validation(format!("requester {} not found", request.user_id))
            })?;
        let coords = self
            .store
            .object_coords(&request.obj_id)
            .await?
            .ok_or_else(|| {
                DispatchError::Validation(format!("object {} not found", request.obj_id))
            })?;

        let options = merge_photometry_options(
            request.photometry_options.as_ref(),
            service.photometry_options.as_ref(),
        );
        let all_points = self.store.photometry_for(&request.obj_id).await?;
        let points = publishable_photometry(&all_points, &options);
        // Report content rules (non-detection, archival fallback) only
        // apply when a report is actually intended; a relay-only request
        // must not fail on them
        let content = if request.publish_to_report_system {
            Some(build_report_content(
                &points,
                &options,
                request.archival,
                request.archival_comment.as_deref(),
            )?)
        } else {
            None
        };

        let (reporter, remarks) = match (request.publishers.clone(), request.remarks.clone()) {
            (Some(reporter), Some(remarks)) => (reporter, remarks),
            _ => {
                let reporter = build_reporter_string(
                    &requester,
                    &service.coauthor_list(),
                    service.acknowledgments.as_deref(),
                )?;
                let remarks = content.as_ref().map(build_remarks).unwrap_or_default();
                self.store
                    .cache_publish_strings(request.id, &reporter, &remarks)
                    .await?;
                (reporter, remarks)
            }
        };

        Ok(Prepared {
            service,
            coords,
            reporter,
            remarks,
            content,
            points,
        })
    }

    async fn dispatch_relay(&self, request: &SubmissionRequest, prepared: &Prepared) -> Result<()> {
        let message = match build_relay_message(
            &prepared.service.name,
            &prepared.coords,
            &prepared.points,
            &prepared.reporter,
            &prepared.remarks,
        ) {
            Ok(message) => message,
            Err(e) => {
                return self
                    .apply_relay_event(request, RelayEvent::Failed { reason: e.to_string() })
                    .await;
            }
        };

        let result = if prepared.service.testing {
            // Testing mode validates against the relay but never publishes
            self.relay_client.validate(&message).await
        } else {
            self.relay_client.publish(&message).await
        };

        let event = match result {
            Ok(()) => RelayEvent::Acknowledged,
            Err(ClientError::RemoteValidation(details)) => RelayEvent::Rejected { details },
            Err(e) => RelayEvent::Failed {
                reason: e.to_string(),
            },
        };
        self.apply_relay_event(request, event).await
    }

    async fn dispatch_report(&self, request: &SubmissionRequest, prepared: &Prepared) -> Result<()> {
        // Content is always built when the report side carries an intent
        let Some(content) = prepared.content.as_ref() else {
            return Ok(());
        };
        let payload =
            to_report_payload(content, &prepared.coords, &prepared.reporter, &prepared.remarks);
        self.store.record_audit(request.id, Some(&payload), None).await?;

        if let Err(e) = self.report_client.validate(&payload).await {
            return self
                .apply_report_event(
                    request,
                    ReportEvent::SubmissionFailed {
                        reason: e.to_string(),
                    },
                )
                .await;
        }

        if prepared.service.testing {
            return self.apply_report_event(request, ReportEvent::TestingValidated).await;
        }

        match self.report_client.submit(&payload).await {
            Ok(report_id) => {
                self.store.set_external_id(request.id, Some(&report_id)).await?;
                self.store
                    .record_audit(request.id, None, Some(&json!({ "report_id": report_id })))
                    .await?;
                self.apply_report_event(request, ReportEvent::Acknowledged { note: None })
                    .await
            }
            Err(e) => {
                self.apply_report_event(
                    request,
                    ReportEvent::SubmissionFailed {
                        reason: e.to_string(),
                    },
                )
                .await
            }
        }
    }

    async fn apply_report_event(
        &self,
        request: &SubmissionRequest,
        event: ReportEvent,
    ) -> Result<()> {
        let next = next_report_status(&ReportStatus::Processing, &event)?;
        self.store.update_report_status(request.id, &next).await
    }

    async fn apply_relay_event(&self, request: &SubmissionRequest, event: RelayEvent) -> Result<()> {
        let next = next_relay_status(&RelayStatus::Processing, &event)?;
        self.store.update_relay_status(request.id, &next).await
    }
}

struct Prepared {
    service: SharingService,
    coords: crate::models::ObjectCoords,
    reporter: String,
    remarks: String,
    content: Option<crate::builder::ReportContent>,
    points: Vec<crate::models::PhotometryPoint>,
}
