use std::time::{Duration, Instant};

/// Exponential retry schedule with a bounded number of attempts.
///
/// The caller supplies the current time to every method, so the schedule
/// can be driven by a fake clock.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    failures: u32,
    next_retry_at: Option<Instant>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            failures: 0,
            next_retry_at: None,
        }
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.max_attempts
    }

    /// When the next attempt may be made; `None` means immediately (or
    /// never, if exhausted).
    pub fn next_retry_at(&self) -> Option<Instant> {
        if self.is_exhausted() {
            return None;
        }
        self.next_retry_at
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        !self.is_exhausted() && self.next_retry_at.map_or(true, |at| now >= at)
    }

    /// Delay imposed after the given number of consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Records a failed attempt and returns when to retry, or `None` once
    /// the attempt budget is spent.
    pub fn record_failure(&mut self, now: Instant) -> Option<Instant> {
        self.failures = self.failures.saturating_add(1);
        if self.is_exhausted() {
            self.next_retry_at = None;
            return None;
        }
        let at = now + self.delay(self.failures);
        self.next_retry_at = Some(at);
        Some(at)
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.next_retry_at = None;
    }
}
