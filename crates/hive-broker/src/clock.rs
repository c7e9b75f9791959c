//! Trusted wall-clock time.
//!
//! Local clocks drift, and claim ordering in leader election compares
//! timestamps taken on different hosts. The [`TrustedClock`] keeps an offset
//! against an external [`TimeSource`] and applies it to every timestamp the
//! broker hands out.

use crate::error::ClockError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A source of trusted wall-clock time.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    async fn now(&self) -> Result<DateTime<Utc>, ClockError>;
}

/// Uses the local system clock. Intended for development and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

#[async_trait]
impl TimeSource for SystemTimeSource {
    fn name(&self) -> &str {
        "system"
    }

    async fn now(&self) -> Result<DateTime<Utc>, ClockError> {
        Ok(Utc::now())
    }
}

/// How often the clock re-synchronizes and how it backs off on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Delay between successful synchronizations.
    pub interval: Duration,
    /// First retry delay after a failure; doubles per attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the retry delay.
    pub max_backoff: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
        }
    }
}

impl RefreshPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Index of the source to use for `attempt`. Rotates through the pool
    /// and restarts from the first source after a full cycle.
    pub fn source_index(&self, attempt: u32, pool_len: usize) -> usize {
        if pool_len == 0 {
            0
        } else {
            attempt as usize % pool_len
        }
    }
}

/// Local clock corrected by the last measured offset to a trusted source.
#[derive(Debug, Clone, Default)]
pub struct TrustedClock {
    offset_ms: Arc<AtomicI64>,
    synced: Arc<AtomicBool>,
}

impl TrustedClock {
    /// Creates an unsynchronized clock (zero offset).
    pub fn new() -> Self {
        Self::default()
    }

    /// Corrected current time.
    pub fn now_utc(&self) -> DateTime<Utc> {
        Utc::now() + TimeDelta::milliseconds(self.offset_ms.load(Ordering::Relaxed))
    }

    /// Corrected current time as an RFC 3339 string with milliseconds.
    pub fn now(&self) -> String {
        hive_types::format_timestamp(self.now_utc())
    }

    /// Offset currently applied to the local clock, in milliseconds.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Whether at least one synchronization has succeeded.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Relaxed)
    }

    /// Measures the offset to `source` once, using the round-trip midpoint.
    ///
    /// # Errors
    ///
    /// Returns the source's error; the previous offset is kept.
    pub async fn sync_once(&self, source: &dyn TimeSource) -> Result<i64, ClockError> {
        let before = Utc::now();
        let remote = source.now().await?;
        let after = Utc::now();
        let midpoint = before + (after - before) / 2;
        let offset = (remote - midpoint).num_milliseconds();
        self.offset_ms.store(offset, Ordering::Relaxed);
        self.synced.store(true, Ordering::Relaxed);
        Ok(offset)
    }

    /// Synchronizes until one source answers, backing off between attempts.
    ///
    /// # Errors
    ///
    /// Returns `ClockError::NoSources` if `sources` is empty. Otherwise it
    /// only returns once a synchronization succeeded.
    pub async fn sync_with_retry(
        &self,
        sources: &[Arc<dyn TimeSource>],
        policy: &RefreshPolicy,
    ) -> Result<i64, ClockError> {
        if sources.is_empty() {
            return Err(ClockError::NoSources);
        }
        let mut attempt: u32 = 0;
        loop {
            let source = &sources[policy.source_index(attempt, sources.len())];
            match self.sync_once(source.as_ref()).await {
                Ok(offset) => {
                    tracing::info!(source = source.name(), offset_ms = offset, "clock synchronized");
                    return Ok(offset);
                }
                Err(e) => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        source = source.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "clock synchronization failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Spawns the refresh loop: synchronize, wait `policy.interval`, repeat.
    pub fn spawn_refresh(
        &self,
        sources: Vec<Arc<dyn TimeSource>>,
        policy: RefreshPolicy,
    ) -> JoinHandle<()> {
        let clock = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = clock.sync_with_retry(&sources, &policy).await {
                    tracing::warn!(error = %e, "clock refresh disabled");
                    return;
                }
                tokio::time::sleep(policy.interval).await;
            }
        })
    }
}
