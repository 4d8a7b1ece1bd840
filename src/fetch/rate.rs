//! Rate Governor Module
//!
//! Paces upstream calls: minimum spacing between calls, a bound on
//! simultaneous calls, and global backoff after quota signals.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::{FetchError, Result};

// == Rate Config ==
#[derive(Debug, Clone)]
pub struct RateConfig {
    /// Minimum gap between the starts of two upstream calls
    pub min_spacing: Duration,
    /// Simultaneous upstream calls allowed
    pub max_concurrent: usize,
    /// Backoff step after a quota signal (multiplied by consecutive hits)
    pub quota_backoff: Duration,
    pub max_quota_retries: u32,
    /// Backoff step after a gateway timeout (multiplied by attempt)
    pub timeout_backoff: Duration,
    pub max_timeout_retries: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(100),
            max_concurrent: 2,
            quota_backoff: Duration::from_secs(10),
            max_quota_retries: 3,
            timeout_backoff: Duration::from_secs(2),
            max_timeout_retries: 3,
        }
    }
}

// == Rate State ==
#[derive(Debug, Clone, Copy, Default)]
pub struct RateState {
    /// Start time reserved by the most recent call
    pub last_call_at: Option<Instant>,
    pub consecutive_quota_hits: u32,
    /// No call may start before this instant
    pub blocked_until: Option<Instant>,
}

// == Rate Permit ==
/// Held for the duration of one upstream call.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

// == Rate Governor ==
#[derive(Debug)]
pub struct RateGovernor {
    config: RateConfig,
    state: Mutex<RateState>,
    permits: Arc<Semaphore>,
}

impl RateGovernor {
    pub fn new(config: RateConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            state: Mutex::new(RateState::default()),
            permits,
        }
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    pub fn state(&self) -> RateState {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // == Acquire ==
    /// Waits for a concurrency slot, then for the pacing/backoff window.
    pub async fn acquire(&self) -> Result<RatePermit> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| FetchError::Internal(format!("rate governor closed: {}", e)))?;

        loop {
            let wait = self.reserve_slot(Instant::now());
            if wait.is_zero() {
                break;
            }
            debug!(wait_ms = wait.as_millis() as u64, "Pacing upstream call");
            sleep(wait).await;
            if self.blocked_remaining(Instant::now()).is_zero() {
                break;
            }
        }

        Ok(RatePermit { _permit: permit })
    }

    /// Reserves the next start time and returns how long the caller must wait.
    fn reserve_slot(&self, now: Instant) -> Duration {
        let mut state = self.lock();
        let mut start = now;
        if let Some(blocked) = state.blocked_until {
            start = start.max(blocked);
        }
        if let Some(last) = state.last_call_at {
            start = start.max(last + self.config.min_spacing);
        }
        state.last_call_at = Some(start);
        start - now
    }

    /// Time left in the current quota backoff window.
    pub fn blocked_remaining(&self, now: Instant) -> Duration {
        self.lock()
            .blocked_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }

    // == Outcomes ==
    pub fn record_success(&self) {
        self.lock().consecutive_quota_hits = 0;
    }

    /// Registers a quota signal: resets pacing and blocks every caller for
    /// the escalated backoff, which is returned.
    pub fn record_quota_hit(&self) -> Duration {
        let mut state = self.lock();
        state.consecutive_quota_hits += 1;
        state.last_call_at = None;
        let backoff = self.quota_backoff(state.consecutive_quota_hits);
        state.blocked_until = Some(Instant::now() + backoff);
        warn!(
            hits = state.consecutive_quota_hits,
            backoff_secs = backoff.as_secs_f64(),
            "Upstream quota exceeded, backing off"
        );
        backoff
    }

    /// Escalating quota backoff: step × hits.
    pub fn quota_backoff(&self, hits: u32) -> Duration {
        self.config.quota_backoff * hits.max(1)
    }

    /// Linear gateway-timeout backoff: step × attempt.
    pub fn timeout_backoff(&self, attempt: u32) -> Duration {
        self.config.timeout_backoff * attempt.max(1)
    }
}
