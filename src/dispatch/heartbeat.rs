//! Periodic liveness log line for operators watching the process.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::LoopControl;

pub struct Heartbeat {
    interval: Duration,
    control: Arc<LoopControl>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            control: LoopControl::new(),
        }
    }

    pub async fn run(&self) {
        if !self.control.start() {
            return;
        }
        let mut beats: u64 = 0;
        while self.control.should_continue() {
            self.control.idle_wait(self.interval).await;
            if !self.control.should_continue() {
                break;
            }
            beats += 1;
            info!(worker_id = %self.control.worker_id(), beats, "Dispatch engine alive");
        }
        self.control.mark_stopped();
    }

    pub async fn stop(&self, timeout: Duration) {
        self.control.request_stop();
        self.control.await_stopped(timeout).await;
    }
}
