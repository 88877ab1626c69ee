//! Single-slot in-flight lock.
//!
//! One caller holds the slot while it performs an operation; everyone else
//! either waits for the slot to clear (without taking it) and then reads the
//! winner's outcome, or backs off. Nobody repeats the work.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

/// A lock that can be awaited without being acquired.
///
/// Built on a `watch` channel so a waiter that subscribes after the
/// release still sees the current (unlocked) value and never misses a
/// wake-up. The channel carries the holder's generation (`None` when
/// free), so a guard only ever releases the hold it acquired.
pub struct Locker {
    state: watch::Sender<Option<u64>>,
    generations: AtomicU64,
}

impl Locker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            generations: AtomicU64::new(0),
        }
    }

    /// Take the lock if it is free. Never blocks.
    ///
    /// The returned guard releases the lock on drop, so an abandoned
    /// operation cannot leave the lock held.
    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        let mut taken = None;
        self.state.send_if_modified(|holder| {
            if holder.is_some() {
                return false;
            }
            let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
            *holder = Some(generation);
            taken = Some(generation);
            true
        });
        taken.map(|generation| LockGuard {
            locker: self,
            generation,
        })
    }

    /// Force-release the lock, whoever holds it. Releasing a free lock is
    /// a no-op. The outstanding guard, if any, becomes inert.
    pub fn unlock(&self) {
        self.state.send_if_modified(|holder| holder.take().is_some());
    }

    /// Release only if `generation` still holds the lock.
    fn release(&self, generation: u64) -> bool {
        self.state.send_if_modified(|holder| {
            if *holder == Some(generation) {
                *holder = None;
                true
            } else {
                false
            }
        })
    }

    /// Suspend until the lock is free. Does not acquire it.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|holder| holder.is_none()).await;
    }

    pub fn is_locked(&self) -> bool {
        self.state.borrow().is_some()
    }
}

impl Default for Locker {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a [`Locker`] until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    locker: &'a Locker,
    generation: u64,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.locker.release(self.generation) {
            tracing::debug!(generation = self.generation, "lock already released by a newer holder");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn lock_is_exclusive() {
        let locker = Locker::new();
        let guard = locker.try_lock().unwrap();
        assert!(locker.is_locked());
        assert!(locker.try_lock().is_none());
        drop(guard);
        assert!(!locker.is_locked());
        assert!(locker.try_lock().is_some());
    }

    #[test]
    fn unlock_is_idempotent() {
        let locker = Locker::new();
        locker.unlock();
        let guard = locker.try_lock().unwrap();
        locker.unlock();
        locker.unlock();
        assert!(!locker.is_locked());
        drop(guard);
        assert!(!locker.is_locked());
    }

    #[test]
    fn stale_guard_does_not_release_newer_holder() {
        let locker = Locker::new();
        let first = locker.try_lock().unwrap();
        locker.unlock();

        let second = locker.try_lock().unwrap();
        drop(first);
        assert!(locker.is_locked());
        assert!(locker.try_lock().is_none());

        drop(second);
        assert!(!locker.is_locked());
    }

    #[tokio::test]
    async fn wait_on_free_lock_returns_immediately() {
        let locker = Locker::new();
        tokio::time::timeout(Duration::from_millis(100), locker.wait())
            .await
            .unwrap();
        assert!(!locker.is_locked());
    }

    #[tokio::test]
    async fn waiters_resume_after_release_without_acquiring() {
        let locker = Arc::new(Locker::new());
        let guard = locker.try_lock().unwrap();
        let woke = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let locker = locker.clone();
                let woke = woke.clone();
                tokio::spawn(async move {
                    locker.wait().await;
                    woke.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(woke.load(Ordering::SeqCst), 0);

        drop(guard);
        for w in waiters {
            w.await.unwrap();
        }
        assert_eq!(woke.load(Ordering::SeqCst), 8);
        assert!(!locker.is_locked());
    }

    #[tokio::test]
    async fn abandoned_holder_releases_lock() {
        let locker = Arc::new(Locker::new());
        let holder = {
            let locker = locker.clone();
            tokio::spawn(async move {
                let _guard = locker.try_lock().unwrap();
                std::future::pending::<()>().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(locker.is_locked());
        holder.abort();
        let _ = holder.await;

        tokio::time::timeout(Duration::from_millis(100), locker.wait())
            .await
            .unwrap();
        assert!(!locker.is_locked());
    }
}
