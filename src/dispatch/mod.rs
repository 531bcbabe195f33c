//! # Dispatch Loops
//!
//! The three long-running workers of the engine plus a heartbeat:
//!
//! - [`SubmissionLoop`] claims eligible submission requests oldest-first
//!   and pushes them to the report clearinghouse and the alert relay
//! - [`ReconciliationLoop`] sweeps stale gateway-timeout items and
//!   verifies submitted reports against the status-check endpoint
//! - [`RetrievalLoop`] re-polls outstanding facility transactions and
//!   persists returned photometry
//!
//! Each loop owns an atomic running flag and a shutdown [`Notify`]; idle
//! waits are interruptible so shutdown never blocks on a sleep. An error
//! in one iteration is logged and the loop continues with the next item.

pub mod heartbeat;
pub mod reconciliation_loop;
pub mod retrieval_loop;
pub mod submission_loop;

pub use heartbeat::Heartbeat;
pub use reconciliation_loop::ReconciliationLoop;
pub use retrieval_loop::RetrievalLoop;
pub use submission_loop::SubmissionLoop;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Shared lifecycle state for one loop instance
#[derive(Debug)]
pub(crate) struct LoopControl {
    running: AtomicBool,
    shutdown: Notify,
    worker_id: Uuid,
}

impl LoopControl {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            worker_id: Uuid::new_v4(),
        })
    }

    pub(crate) fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub(crate) fn start(&self) -> bool {
        !self.running.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn should_continue(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Sleep that returns early when shutdown is requested
    pub(crate) async fn idle_wait(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.notified() => {}
        }
    }

    /// Wait for the running flag to clear, up to `timeout`
    pub(crate) async fn await_stopped(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.running.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}
