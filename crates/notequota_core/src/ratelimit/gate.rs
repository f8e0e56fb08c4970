//! Allow/reject decisions over the window store.

use super::store::RateLimiterStore;
use crate::clock::Clock;
use crate::error::{QuotaError, QuotaResult};
use log::warn;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of one gated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    /// Count after this request was recorded.
    pub current: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at_epoch_ms: u64,
    /// Advisory back-off, present only on rejection.
    pub retry_after_ms: Option<u64>,
}

impl RateDecision {
    /// Standard rate-limit response headers for transport adapters.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            (
                "X-RateLimit-Reset",
                self.reset_at_epoch_ms.div_ceil(1_000).to_string(),
            ),
        ];
        if let Some(retry_after_ms) = self.retry_after_ms {
            headers.push(("Retry-After", retry_after_ms.div_ceil(1_000).to_string()));
        }
        headers
    }
}

/// Request gate: allow iff `increment(key) <= max_per_window`.
#[derive(Clone)]
pub struct RateLimitGate {
    store: Arc<RateLimiterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimitGate {
    pub fn new(store: Arc<RateLimiterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records one request and returns the decision. Never fails.
    pub fn check(&self, key: &str, window_ms: u64, max_per_window: u64) -> RateDecision {
        let now_ms = self.clock.now_ms();
        let window = self.store.increment(key, window_ms, now_ms);
        let allowed = window.count <= max_per_window;

        RateDecision {
            allowed,
            current: window.count,
            limit: max_per_window,
            remaining: max_per_window.saturating_sub(window.count),
            reset_at_epoch_ms: window.reset_at_epoch_ms,
            retry_after_ms: (!allowed)
                .then(|| window.reset_at_epoch_ms.saturating_sub(now_ms)),
        }
    }

    /// Like `check`, but turns a rejection into `QuotaError::Throttled`.
    pub fn enforce(
        &self,
        key: &str,
        window_ms: u64,
        max_per_window: u64,
    ) -> QuotaResult<RateDecision> {
        let decision = self.check(key, window_ms, max_per_window);
        if decision.allowed {
            return Ok(decision);
        }

        let retry_after_ms = decision.retry_after_ms.unwrap_or(0);
        warn!(
            "event=rate_limited module=rate_limit status=rejected current={} max={} retry_after_ms={}",
            decision.current, decision.limit, retry_after_ms
        );
        Err(QuotaError::Throttled {
            key: key.to_string(),
            current: decision.current,
            max: decision.limit,
            retry_after_ms,
        })
    }

    pub fn store(&self) -> &Arc<RateLimiterStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::RateLimitGate;
    use crate::clock::ManualClock;
    use crate::error::QuotaError;
    use crate::ratelimit::RateLimiterStore;
    use std::sync::Arc;

    fn gate(start_ms: u64) -> (RateLimitGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let gate = RateLimitGate::new(Arc::new(RateLimiterStore::new()), clock.clone());
        (gate, clock)
    }

    #[test]
    fn sixth_request_in_window_is_rejected_with_retry_after() {
        let (gate, clock) = gate(1_000);
        for expected in 1..=5 {
            let decision = gate.check("user:7", 60_000, 5);
            assert!(decision.allowed);
            assert_eq!(decision.current, expected);
            assert_eq!(decision.remaining, 5 - expected);
        }

        clock.advance(10_000);
        let decision = gate.check("user:7", 60_000, 5);
        assert!(!decision.allowed);
        assert_eq!(decision.current, 6);
        assert_eq!(decision.retry_after_ms, Some(50_000));
        assert_eq!(decision.reset_at_epoch_ms, 61_000);

        clock.set(61_000);
        let decision = gate.check("user:7", 60_000, 5);
        assert!(decision.allowed);
        assert_eq!(decision.current, 1);
    }

    #[test]
    fn enforce_maps_rejection_to_throttled() {
        let (gate, _clock) = gate(0);
        gate.enforce("k", 1_000, 1).unwrap();
        let err = gate.enforce("k", 1_000, 1).unwrap_err();
        assert!(matches!(
            err,
            QuotaError::Throttled { current: 2, max: 1, retry_after_ms: 1_000, .. }
        ));
    }

    #[test]
    fn headers_round_up_to_seconds() {
        let (gate, _clock) = gate(1_500);
        gate.check("k", 1_000, 1);
        let headers = gate.check("k", 1_000, 1).headers();
        assert!(headers.contains(&("X-RateLimit-Limit", "1".to_string())));
        assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
        assert!(headers.contains(&("X-RateLimit-Reset", "3".to_string())));
        assert!(headers.contains(&("Retry-After", "1".to_string())));
    }
}
