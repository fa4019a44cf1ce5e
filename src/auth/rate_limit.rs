//! Per-key sliding-window rate limiter
//!
//! Minute and hour windows share one timestamp deque per key, kept
//! in-process in a `DashMap`. The durable daily counters live in the key
//! store; this layer only guards the short windows.

use super::AdmissionError;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);

#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check both windows without consuming a slot. On rejection the
    /// retry hint is the time until the oldest relevant entry expires.
    pub fn check(
        &self,
        key: &str,
        per_minute: u32,
        per_hour: u32,
    ) -> Result<(), AdmissionError> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_default();
        prune(&mut entry, now);

        let minute_count = entry
            .iter()
            .filter(|&&at| now.duration_since(at) < MINUTE)
            .count() as u32;
        if minute_count >= per_minute {
            let oldest_in_minute = entry
                .iter()
                .find(|&&at| now.duration_since(at) < MINUTE)
                .copied();
            let retry = oldest_in_minute
                .map(|at| MINUTE.saturating_sub(now.duration_since(at)))
                .unwrap_or(MINUTE);
            return Err(AdmissionError::RateLimited {
                retry_after_secs: retry.as_secs().max(1),
            });
        }

        let hour_count = entry.len() as u32;
        if hour_count >= per_hour {
            let retry = entry
                .front()
                .map(|&at| HOUR.saturating_sub(now.duration_since(at)))
                .unwrap_or(HOUR);
            return Err(AdmissionError::RateLimited {
                retry_after_secs: retry.as_secs().max(1),
            });
        }

        Ok(())
    }

    /// Consume a slot after admission.
    pub fn record(&self, key: &str) {
        let mut entry = self.windows.entry(key.to_string()).or_default();
        entry.push_back(Instant::now());
    }
}

/// Drop timestamps older than the hour window; the deque stays ordered
fn prune(entry: &mut VecDeque<Instant>, now: Instant) {
    while entry
        .front()
        .is_some_and(|&at| now.duration_since(at) >= HOUR)
    {
        entry.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_minute_cap() {
        let limiter = RateLimiter::new();
        for _ in 0..10 {
            limiter.check("k", 10, 1_000).unwrap();
            limiter.record("k");
        }
        assert!(matches!(
            limiter.check("k", 10, 1_000),
            Err(AdmissionError::RateLimited { retry_after_secs }) if retry_after_secs >= 1
        ));
    }

    #[test]
    fn keys_do_not_share_windows() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.record("a");
        }
        assert!(limiter.check("b", 5, 100).is_ok());
        assert!(limiter.check("a", 5, 100).is_err());
    }

    #[test]
    fn hour_cap_kicks_in_below_minute_cap() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.record("k");
        }
        // Minute cap allows plenty, hour cap of 3 is exhausted
        assert!(matches!(
            limiter.check("k", 100, 3),
            Err(AdmissionError::RateLimited { .. })
        ));
    }
}
