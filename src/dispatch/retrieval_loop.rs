//! # Retrieval Loop
//!
//! Re-polls outstanding facility transactions within the trailing window
//! and persists returned photometry. The stored request tuple is replayed
//! verbatim on every poll; the facility's adapter classifies the response
//! into keep-polling, complete, or a terminal failure. Transport errors
//! only refresh the poll timestamp, never the status. Consecutive polls
//! are paced so a large backlog does not hammer the facilities.

use crate::clients::{AdapterRegistry, FacilityHttpClient, PollOutcome};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::models::FacilityTransactionRequest;
use crate::notify::{Notification, NotificationSink};
use crate::state_machine::FacilityStatus;
use crate::store::FacilityStore;
use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::LoopControl;

pub struct RetrievalLoop<S: FacilityStore> {
    store: Arc<S>,
    http: FacilityHttpClient,
    registry: Arc<AdapterRegistry>,
    notifier: Arc<dyn NotificationSink>,
    config: DispatchConfig,
    control: Arc<LoopControl>,
}

impl<S: FacilityStore> RetrievalLoop<S> {
    pub fn new(
        store: Arc<S>,
        http: FacilityHttpClient,
        registry: Arc<AdapterRegistry>,
        notifier: Arc<dyn NotificationSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            http,
            registry,
            notifier,
            config,
            control: LoopControl::new(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        if !self.control.start() {
            return Ok(());
        }
        info!(worker_id = %self.control.worker_id(), "Retrieval loop started");

        while self.control.should_continue() {
            if let Err(e) = self.process_batch(Utc::now().naive_utc()).await {
                error!(worker_id = %self.control.worker_id(), error = %e,
                    "Retrieval batch failed");
            }
            self.control.idle_wait(self.config.retrieval_repoll_after).await;
        }

        self.control.mark_stopped();
        info!(worker_id = %self.control.worker_id(), "Retrieval loop stopped");
        Ok(())
    }

    pub async fn stop(&self, timeout: std::time::Duration) {
        self.control.request_stop();
        self.control.await_stopped(timeout).await;
    }

    /// Poll every due transaction once. Returns the number polled.
    #[instrument(skip(self), fields(worker_id = %self.control.worker_id()))]
    pub async fn process_batch(&self, now: NaiveDateTime) -> Result<usize> {
        let window =
            chrono::Duration::from_std(self.config.retrieval_window).unwrap_or_else(|_| chrono::Duration::zero());
        let repoll =
            chrono::Duration::from_std(self.config.retrieval_repoll_after).unwrap_or_else(|_| chrono::Duration::zero());
        let due = self.store.due_transactions(now - window, now - repoll).await?;

        let mut polled = 0usize;
        let mut first = true;
        for txn in due {
            if !first {
                self.control.idle_wait(self.config.retrieval_pacing).await;
            }
            first = false;
            self.poll_transaction(&txn).await?;
            polled += 1;
        }
        Ok(polled)
    }

    async fn poll_transaction(&self, txn: &FacilityTransactionRequest) -> Result<()> {
        let Some(adapter) = self.registry.get(&txn.facility_name).await else {
            let reason = format!("no adapter registered for facility {}", txn.facility_name);
            warn!(txn_id = txn.id, facility = %txn.facility_name, "Unknown facility");
            self.conclude(txn, FacilityStatus::Error { reason }).await?;
            return Ok(());
        };

        let outcome = match adapter.poll(&self.http, txn).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Transport failure: the transaction stays live and the
                // refreshed timestamp defers the next attempt
                warn!(txn_id = txn.id, facility = %txn.facility_name, error = %e,
                    "Facility poll failed");
                self.store.touch_last_query(txn.id).await?;
                return Ok(());
            }
        };

        match outcome {
            PollOutcome::KeepPolling { note } => {
                self.store.touch_last_query(txn.id).await?;
                if let Some(note) = note {
                    self.store.update_transaction_status(txn.id, &FacilityStatus::Note(note.clone())).await?;
                    self.store.sync_followup_status(txn.followup_request_id, &note).await?;
                }
            }
            PollOutcome::Complete { points } => {
                let inserted = self
                    .store
                    .insert_photometry_dedup(&txn.obj_id, &points)
                    .await?;
                info!(
                    txn_id = txn.id,
                    obj_id = %txn.obj_id,
                    facility = %txn.facility_name,
                    returned = points.len(),
                    inserted,
                    "Facility transaction complete"
                );
                self.conclude(txn, FacilityStatus::Complete).await?;
            }
            PollOutcome::Failed { reason } => {
                warn!(txn_id = txn.id, facility = %txn.facility_name, reason = %reason,
                    "Facility transaction failed");
                self.conclude(txn, FacilityStatus::Error { reason }).await?;
            }
        }
        Ok(())
    }

    /// Record a terminal status, mirror it onto the owning follow-up, and
    /// notify observers
    async fn conclude(
        &self,
        txn: &FacilityTransactionRequest,
        status: FacilityStatus,
    ) -> Result<()> {
        self.store.update_transaction_status(txn.id, &status).await?;
        self.store
            .sync_followup_status(txn.followup_request_id, &status.to_string())
            .await?;
        self.notifier
            .notify(Notification::FollowupRefresh {
                followup_request_id: txn.followup_request_id,
            })
            .await;
        Ok(())
    }
}
