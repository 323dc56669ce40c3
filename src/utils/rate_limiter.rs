/// Per-principal inbound rate limiting (§5, §10.4): a sliding-window request
/// count over one hour, scaled by access level. Distinct from `Limiters`
/// (outbound concurrency semaphores) -- this one is about how often a
/// principal may call chat/search, not how many calls run concurrently.
use dashmap::DashMap;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(3600);

struct Window {
    started_at: Instant,
    count: u32,
}

pub struct InboundRateLimiter {
    windows: DashMap<i64, Window>,
    baseline_per_hour: u32,
    enabled: bool,
}

/// How an access level scales the baseline rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevelScale {
    Baseline,
    Double,
    Half,
}

impl AccessLevelScale {
    pub fn apply(self, baseline: u32) -> u32 {
        match self {
            AccessLevelScale::Baseline => baseline,
            AccessLevelScale::Double => baseline.saturating_mul(2),
            AccessLevelScale::Half => (baseline / 2).max(1),
        }
    }
}

impl InboundRateLimiter {
    pub fn new(baseline_per_hour: u32, enabled: bool) -> Self {
        Self {
            windows: DashMap::new(),
            baseline_per_hour,
            enabled,
        }
    }

    /// Returns `Ok(())` if the call is allowed, `Err(retry_after_secs)` otherwise.
    pub fn check(&self, principal_id: i64, scale: AccessLevelScale) -> Result<(), u64> {
        if !self.enabled {
            return Ok(());
        }

        let limit = scale.apply(self.baseline_per_hour);
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry(principal_id)
            .or_insert_with(|| Window {
                started_at: now,
                count: 0,
            });

        if now.duration_since(entry.started_at) >= WINDOW {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let elapsed = now.duration_since(entry.started_at);
            let retry_after = WINDOW.saturating_sub(elapsed).as_secs().max(1);
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let limiter = InboundRateLimiter::new(2, true);
        assert!(limiter.check(1, AccessLevelScale::Baseline).is_ok());
        assert!(limiter.check(1, AccessLevelScale::Baseline).is_ok());
        assert!(limiter.check(1, AccessLevelScale::Baseline).is_err());
    }

    #[test]
    fn scales_limit_by_access_level() {
        let limiter = InboundRateLimiter::new(2, true);
        for _ in 0..4 {
            assert!(limiter.check(2, AccessLevelScale::Double).is_ok());
        }
        assert!(limiter.check(2, AccessLevelScale::Double).is_err());
    }

    #[test]
    fn disabled_limiter_never_blocks() {
        let limiter = InboundRateLimiter::new(1, false);
        for _ in 0..10 {
            assert!(limiter.check(3, AccessLevelScale::Half).is_ok());
        }
    }
}
