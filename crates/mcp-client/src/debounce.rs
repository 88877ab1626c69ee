//! Single-instance deferred action (idle-disconnect scheduler).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Runs at most one pending action after a fixed delay.
///
/// Every [`schedule`](Self::schedule) cancels whatever is pending and arms
/// the new action from scratch; actions never queue. Once an action fires
/// it detaches itself from the slot, so a later `schedule` or `cancel`
/// cannot abort it mid-run.
pub struct Debouncer {
    delay: Duration,
    slot: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm `action` to run after the delay, replacing any pending action.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(previous) = slot.pending.take() {
            previous.abort();
        }

        let generation = slot.generation;
        let delay = self.delay;
        let shared = Arc::clone(&self.slot);
        slot.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock();
                // Superseded between the timer firing and this check.
                if slot.generation != generation {
                    return;
                }
                slot.pending = None;
            }
            action().await;
        }));
    }

    /// Disarm the pending action, if any.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(previous) = slot.pending.take() {
            previous.abort();
        }
    }

    /// Whether an action is armed and has not fired yet.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
