//! Consent gate for the hit queue.

use crate::consent::ConsentStatus;
use crate::shared_state::{SharedState, SharedStateRegistry};
use edge_store::HitQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// Decides whether the hit queue may drain.
///
/// | consent | queue                         |
/// |---------|-------------------------------|
/// | yes     | draining                      |
/// | no      | cleared, then draining        |
/// | pending | suspended, contents preserved |
///
/// Draining after "no" lets already-queued consent updates and resets go
/// out; experience events are refused before they reach the queue.
pub struct QueueController {
    queue: Arc<dyn HitQueue>,
    status: Mutex<ConsentStatus>,
    suspended: AtomicBool,
    bootstrapped: AtomicBool,
    wake: Arc<Notify>,
}

impl QueueController {
    /// A controller starts suspended with pending consent.
    pub fn new(queue: Arc<dyn HitQueue>, wake: Arc<Notify>) -> Self {
        Self {
            queue,
            status: Mutex::new(ConsentStatus::Pending),
            suspended: AtomicBool::new(true),
            bootstrapped: AtomicBool::new(false),
            wake,
        }
    }

    pub fn consent(&self) -> ConsentStatus {
        *self.status.lock()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    /// Read the consent shared state once. Without a consent component the
    /// status is Yes. Returns false if already bootstrapped.
    pub fn bootstrap(&self, registry: &dyn SharedStateRegistry) -> bool {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return false;
        }

        let status = match registry.consent() {
            SharedState::Unregistered => ConsentStatus::Yes,
            SharedState::Set(preferences) => ConsentStatus::from_preferences(&preferences),
            SharedState::Pending => ConsentStatus::Pending,
        };
        debug!(%status, "Bootstrapping consent");
        self.transition(status, true);
        true
    }

    /// Apply a consent change. Repeating the current status is a no-op.
    pub fn apply(&self, status: ConsentStatus) {
        self.bootstrapped.store(true, Ordering::SeqCst);
        self.transition(status, false);
    }

    fn transition(&self, status: ConsentStatus, force: bool) {
        let mut current = self.status.lock();
        if *current == status && !force {
            return;
        }
        let previous = *current;
        *current = status;
        info!(from = %previous, to = %status, "Consent changed");

        match status {
            ConsentStatus::Yes => self.resume(),
            ConsentStatus::No => {
                match self.queue.clear() {
                    Ok(dropped) => info!(dropped, "Cleared hit queue after consent denial"),
                    Err(e) => error!(error = %e, "Failed to clear hit queue"),
                }
                self.resume();
            }
            ConsentStatus::Pending => {
                self.suspended.store(true, Ordering::SeqCst);
            }
        }
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }
}
