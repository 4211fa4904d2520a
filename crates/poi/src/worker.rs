// Path: crates/poi/src/worker.rs
//! Start/stop bookkeeping shared by the background loops.

use crate::error::PoiError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
pub(crate) struct LoopControl {
    shutdown: AtomicBool,
    running: AtomicBool,
    wake: Notify,
    fatal: Mutex<Option<PoiError>>,
}

impl LoopControl {
    /// Marks the loop as running. Called before the task is spawned so a
    /// `stop` racing the spawn still waits for it.
    pub(crate) fn begin(&self) {
        self.shutdown.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleeps for `interval` or until woken by `request_stop`.
    pub(crate) async fn idle(&self, interval: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.wake.notified() => {}
        }
    }

    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_fatal(&self, error: PoiError) {
        *self.fatal.lock() = Some(error);
    }

    pub(crate) fn fatal(&self) -> Option<PoiError> {
        self.fatal.lock().clone()
    }

    /// Raises the shutdown flag and polls until the loop has finished its
    /// current unit of work.
    pub(crate) async fn request_stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        while self.is_running() {
            tokio::time::sleep(STOP_POLL).await;
        }
    }
}
