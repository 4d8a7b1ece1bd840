//! In-Flight Registry Module
//!
//! Guarantees at most one upstream call per fingerprint. Presence of a key in
//! the registry is the "in progress" state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{FetchError, Result};

// == In-Flight Handle ==
/// Marker for an upstream call in progress. Clones share one completion signal.
#[derive(Debug, Clone)]
pub struct InFlightHandle {
    pub key: String,
    pub started_at: Instant,
    done: Arc<watch::Sender<bool>>,
}

impl InFlightHandle {
    pub fn new(key: impl Into<String>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            key: key.into(),
            started_at: Instant::now(),
            done: Arc::new(done),
        }
    }

    /// Resolves once the call has completed, however it ended.
    pub async fn completed(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_completed(&self) -> bool {
        *self.done.borrow()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn complete(&self) {
        self.done.send_replace(true);
    }
}

// == In-Flight Registry ==
/// One mutex around a plain map; critical sections never await or do I/O.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    slots: Mutex<HashMap<String, InFlightHandle>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, InFlightHandle>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_in_progress(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Handle of the call in progress for `key`, if any.
    pub fn handle(&self, key: &str) -> Option<InFlightHandle> {
        self.lock().get(key).cloned()
    }

    /// Registers a call; fails with `DuplicateRequest` if one is already running.
    pub fn mark_in_progress(&self, key: &str, handle: InFlightHandle) -> Result<()> {
        let mut slots = self.lock();
        if slots.contains_key(key) {
            return Err(FetchError::DuplicateRequest(key.to_string()));
        }
        slots.insert(key.to_string(), handle);
        trace!(key, "Marked in progress");
        Ok(())
    }

    /// Removes the key and wakes anyone waiting on it. Returns whether it was present.
    pub fn mark_completed(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(handle) => {
                handle.complete();
                trace!(key, elapsed_ms = handle.elapsed().as_millis() as u64, "Marked completed");
                true
            }
            None => false,
        }
    }

    /// Atomically checks and registers, returning a guard that completes the
    /// key when dropped, on every exit path.
    pub fn try_begin(self: &Arc<Self>, key: &str) -> Result<InFlightGuard> {
        self.mark_in_progress(key, InFlightHandle::new(key))?;
        Ok(InFlightGuard {
            registry: Arc::clone(self),
            key: key.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// == Guard ==
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    key: String,
}

impl InFlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.mark_completed(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_complete() {
        let registry = InFlightRegistry::new();
        assert!(!registry.is_in_progress("k"));

        registry.mark_in_progress("k", InFlightHandle::new("k")).unwrap();
        assert!(registry.is_in_progress("k"));

        assert!(registry.mark_completed("k"));
        assert!(!registry.is_in_progress("k"));
        assert!(!registry.mark_completed("k"));
    }

    #[test]
    fn test_second_mark_is_duplicate() {
        let registry = InFlightRegistry::new();
        registry.mark_in_progress("k", InFlightHandle::new("k")).unwrap();

        let err = registry
            .mark_in_progress("k", InFlightHandle::new("k"))
            .unwrap_err();
        assert!(matches!(err, FetchError::DuplicateRequest(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_guard_completes_on_drop() {
        let registry = Arc::new(InFlightRegistry::new());
        {
            let guard = registry.try_begin("k").unwrap();
            assert_eq!(guard.key(), "k");
            assert!(registry.try_begin("k").is_err());
        }
        assert!(registry.is_empty());
        assert!(registry.try_begin("k").is_ok());
    }

    #[test]
    fn test_guard_completes_on_panic() {
        let registry = Arc::new(InFlightRegistry::new());
        let cloned = Arc::clone(&registry);
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.try_begin("k").unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!registry.is_in_progress("k"));
    }

    #[tokio::test]
    async fn test_waiters_wake_on_completion() {
        let registry = Arc::new(InFlightRegistry::new());
        let guard = registry.try_begin("k").unwrap();
        let handle = registry.handle("k").unwrap();

        let waiter = tokio::spawn(async move {
            handle.completed().await;
            handle.is_completed()
        });

        tokio::task::yield_now().await;
        drop(guard);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_resolves_after_the_fact() {
        let handle = InFlightHandle::new("k");
        let registry = InFlightRegistry::new();
        registry.mark_in_progress("k", handle.clone()).unwrap();
        registry.mark_completed("k");

        handle.completed().await;
        assert!(handle.is_completed());
    }
}
