mod common;

use common::{default_harness, harness};
use notequota_core::{open_db_in_memory, EngineConfig, QuotaError, RateLimitConfig};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn sixth_request_is_rejected_and_window_resets() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();

    for expected in 1..=5 {
        let decision = engine.check_rate("ip:10.0.0.1", 60_000, 5);
        assert!(decision.allowed);
        assert_eq!(decision.current, expected);
        assert_eq!(decision.remaining, 5 - expected);
        assert_eq!(decision.reset_at_epoch_ms, 1_060_000);
    }

    h.clock.advance(10_000);
    let rejected = engine.check_rate("ip:10.0.0.1", 60_000, 5);
    assert!(!rejected.allowed);
    assert_eq!(rejected.current, 6);
    assert_eq!(rejected.remaining, 0);
    assert_eq!(rejected.retry_after_ms, Some(50_000));

    // Other keys have their own window.
    assert!(engine.check_rate("ip:10.0.0.2", 60_000, 5).allowed);

    h.clock.set(1_060_000);
    let reset = engine.check_rate("ip:10.0.0.1", 60_000, 5);
    assert!(reset.allowed);
    assert_eq!(reset.current, 1);
    assert_eq!(reset.reset_at_epoch_ms, 1_120_000);
}

#[test]
fn rejection_headers_carry_retry_after() {
    let h = default_harness();
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    engine.check_rate("user:1", 1_500, 1);
    let rejected = engine.check_rate("user:1", 1_500, 1);

    let headers = rejected.headers();
    let value = |name: &str| {
        headers
            .iter()
            .find(|(header, _)| *header == name)
            .map(|(_, value)| value.clone())
    };
    assert_eq!(value("X-RateLimit-Limit").as_deref(), Some("1"));
    assert_eq!(value("X-RateLimit-Remaining").as_deref(), Some("0"));
    assert_eq!(value("X-RateLimit-Reset").as_deref(), Some("1002"));
    assert_eq!(value("Retry-After").as_deref(), Some("2"));

    let json = serde_json::to_value(&rejected).unwrap();
    assert_eq!(json["allowed"], false);
    assert_eq!(json["retryAfterMs"], 1_500);
}

#[test]
fn caller_gate_throttles_mutations() {
    let h = harness(EngineConfig {
        rate_limit: RateLimitConfig {
            window_ms: 1_000,
            max_per_window: 2,
            ..RateLimitConfig::default()
        },
        ..EngineConfig::default()
    });
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap().for_caller("user:42");

    let account = engine.create_account(Some("pro")).unwrap();
    engine.create_module(account.id).unwrap();
    let err = engine.create_module(account.id).unwrap_err();
    assert!(matches!(
        err,
        QuotaError::Throttled {
            ref key,
            current: 3,
            max: 2,
            retry_after_ms: 1_000,
        } if key == "user:42"
    ));
    assert_eq!(err.code(), "throttled");
    assert_eq!(engine.account(account.id).unwrap().module_count, 1);

    // Reads are not gated.
    assert!(engine.can_create_module(account.id).unwrap().allowed);

    h.clock.advance(1_000);
    engine.create_module(account.id).unwrap();
    assert_eq!(engine.account(account.id).unwrap().module_count, 2);
}

#[test]
fn sweeper_evicts_expired_windows() {
    let h = harness(EngineConfig {
        rate_limit: RateLimitConfig {
            sweep_interval_ms: 5,
            ..RateLimitConfig::default()
        },
        ..EngineConfig::default()
    });
    let conn = open_db_in_memory().unwrap();
    let engine = h.ctx.engine(&conn).unwrap();
    engine.check_rate("short", 100, 10);
    engine.check_rate("long", 1_000_000, 10);
    h.clock.advance(500);

    let limiter = Arc::clone(h.ctx.rate_limiter());
    let handle = h.ctx.spawn_rate_sweeper().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while limiter.len() > 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    handle.stop();

    assert_eq!(limiter.len(), 1);
    assert_eq!(limiter.get("short", 1_000_500), 0);
    assert_eq!(limiter.get("long", 1_000_500), 1);
}
