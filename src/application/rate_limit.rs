use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a rate-limit check for a single caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Seconds until the oldest hit in the window expires; zero when allowed.
    pub retry_after_secs: u64,
    /// The hit recorded for an allowed check, for [`RateLimiter::release`].
    pub recorded_at: Option<Instant>,
}

/// Sliding-window limiter keyed by caller id.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let window = self.window;

        let mut entry = self.buckets.entry(key.to_string()).or_default();
        entry.retain(|instant| now.saturating_duration_since(*instant) < window);

        let remaining = self.max_requests.saturating_sub(entry.len() as u32);
        if remaining == 0 {
            let oldest = entry.iter().min().copied().unwrap_or(now);
            let elapsed = now.saturating_duration_since(oldest);
            let retry_after = window.saturating_sub(elapsed).as_secs_f64().ceil() as u64;
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs: retry_after.max(1),
                recorded_at: None,
            };
        }

        entry.push(now);
        RateDecision {
            allowed: true,
            remaining: remaining.saturating_sub(1),
            retry_after_secs: 0,
            recorded_at: Some(now),
        }
    }

    /// Give back the hit an allowed check recorded, e.g. when the guarded action failed.
    pub fn release(&self, key: &str, decision: &RateDecision) {
        let Some(recorded_at) = decision.recorded_at else {
            return;
        };
        if let Some(mut entry) = self.buckets.get_mut(key) {
            if let Some(position) = entry.iter().rposition(|hit| *hit == recorded_at) {
                entry.remove(position);
            }
        }
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_requests_within_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let start = Instant::now();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_at("user_1", start);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let blocked = limiter.check_at("user_1", start + Duration::from_secs(10));
        assert!(!blocked.allowed);
        assert_eq!(blocked.retry_after_secs, 50);
    }

    #[test]
    fn released_hit_frees_its_slot() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let start = Instant::now();

        let first = limiter.check_at("user_1", start);
        assert!(first.allowed);
        assert!(!limiter.check_at("user_1", start + Duration::from_secs(1)).allowed);

        limiter.release("user_1", &first);
        let retried = limiter.check_at("user_1", start + Duration::from_secs(2));
        assert!(retried.allowed);

        let blocked = limiter.check_at("user_1", start + Duration::from_secs(3));
        limiter.release("user_1", &blocked);
        assert!(!limiter.check_at("user_1", start + Duration::from_secs(4)).allowed);
    }

    #[test]
    fn window_slides_and_keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let start = Instant::now();

        assert!(limiter.check_at("user_1", start).allowed);
        assert!(limiter.check_at("user_2", start).allowed);
        assert!(!limiter.check_at("user_1", start + Duration::from_secs(59)).allowed);
        assert!(limiter.check_at("user_1", start + Duration::from_secs(60)).allowed);
    }
}
