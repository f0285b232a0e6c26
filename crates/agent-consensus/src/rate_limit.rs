//! Fixed-window admission control per caller
//!
//! Window state lives behind [`WindowStore`] and time comes from [`Clock`], so
//! the counting logic in [`RateGovernor`] stays testable with a manual clock
//! and can move to a shared store for multi-instance deployments.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::error::{ConsensusError, Result};

pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(ConsensusError::ConfigurationError(
                "rate limit max_requests must be greater than 0".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(ConsensusError::ConfigurationError(
                "rate limit window must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Per-caller counter for the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl WindowState {
    /// A window stays open up to and including its reset instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.reset_at
    }
}

#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<WindowState>>;
    async fn store(&self, key: &str, state: WindowState) -> Result<()>;
    /// Drop windows that have expired at `now`, returning how many were dropped
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Process-local window table; state does not survive a restart
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: RwLock<HashMap<String, WindowState>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.windows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn load(&self, key: &str) -> Result<Option<WindowState>> {
        Ok(self.windows.read().await.get(key).copied())
    }

    async fn store(&self, key: &str, state: WindowState) -> Result<()> {
        self.windows.write().await.insert(key.to_string(), state);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, state| !state.is_expired(now));
        Ok(before - windows.len())
    }
}

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_in_seconds: u64,
    pub reset_at: DateTime<Utc>,
}

impl Admission {
    /// `X-RateLimit-Remaining` and `X-RateLimit-Reset` (unix seconds)
    pub fn headers(&self) -> [(&'static str, String); 2] {
        [
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_at.timestamp().to_string()),
        ]
    }

    pub fn to_error(&self, key: &str) -> ConsensusError {
        ConsensusError::RateLimitExceeded {
            key: key.to_string(),
            reset_in_seconds: self.reset_in_seconds,
        }
    }
}

pub struct RateGovernor {
    policy: RateLimitPolicy,
    window: TimeDelta,
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    // admissions read-modify-write the store; one at a time
    gate: Mutex<()>,
}

impl std::fmt::Debug for RateGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGovernor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RateGovernor {
    pub fn new(
        policy: RateLimitPolicy,
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        policy.validate()?;
        let window = TimeDelta::from_std(policy.window).map_err(|e| {
            ConsensusError::ConfigurationError(format!("rate limit window out of range: {e}"))
        })?;
        Ok(Self {
            policy,
            window,
            store,
            clock,
            gate: Mutex::new(()),
        })
    }

    /// In-memory store and the system clock
    pub fn in_memory(policy: RateLimitPolicy) -> Result<Self> {
        Self::new(policy, Arc::new(InMemoryWindowStore::new()), Arc::new(SystemClock))
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    fn admission(&self, allowed: bool, count: u32, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Admission {
        let remaining_ms = (reset_at - now).num_milliseconds().max(0).unsigned_abs();
        Admission {
            allowed,
            remaining: self.policy.max_requests.saturating_sub(count),
            reset_in_seconds: remaining_ms.div_ceil(1000).max(1),
            reset_at,
        }
    }

    /// Count one request against `key`
    ///
    /// The first request, or the first after the window's reset instant, opens
    /// a new window. Once the cap is reached, requests are denied without
    /// touching the stored count.
    pub async fn admit(&self, key: &str) -> Result<Admission> {
        let _gate = self.gate.lock().await;
        let now = self.clock.now();

        let admission = match self.store.load(key).await? {
            Some(state) if !state.is_expired(now) => {
                if state.count >= self.policy.max_requests {
                    self.admission(false, state.count, state.reset_at, now)
                } else {
                    let next = WindowState {
                        count: state.count + 1,
                        reset_at: state.reset_at,
                    };
                    self.store.store(key, next).await?;
                    self.admission(true, next.count, next.reset_at, now)
                }
            }
            _ => {
                let fresh = WindowState {
                    count: 1,
                    reset_at: now + self.window,
                };
                self.store.store(key, fresh).await?;
                self.admission(true, fresh.count, fresh.reset_at, now)
            }
        };

        if admission.allowed {
            tracing::debug!(key, remaining = admission.remaining, "request admitted");
        } else {
            tracing::warn!(key, reset_in_seconds = admission.reset_in_seconds, "rate limit exceeded");
        }
        Ok(admission)
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        let _gate = self.gate.lock().await;
        self.store.purge_expired(self.clock.now()).await
    }
}
