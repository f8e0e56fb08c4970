//! Per-key window counters.

use dashmap::DashMap;

/// Snapshot of one key's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    pub key: String,
    pub count: u64,
    pub reset_at_epoch_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u64,
    reset_at_ms: u64,
}

impl WindowState {
    fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.reset_at_ms
    }
}

/// Process-local window store, shared by reference through the engine context.
#[derive(Debug, Default)]
pub struct RateLimiterStore {
    windows: DashMap<String, WindowState>,
}

impl RateLimiterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one request for `key` and returns the updated window.
    ///
    /// - Empty key: opens a window with `count = 1`, `resetAt = now + window`.
    /// - Active window (`now < resetAt`): `count += 1`.
    /// - Expired window (`now >= resetAt`): restarts at `count = 1`.
    pub fn increment(&self, key: &str, window_ms: u64, now_ms: u64) -> RateWindow {
        let mut state = self
            .windows
            .entry(key.to_string())
            .or_insert(WindowState {
                count: 0,
                reset_at_ms: 0,
            });

        if state.count > 0 && state.is_active(now_ms) {
            state.count = state.count.saturating_add(1);
        } else {
            state.count = 1;
            state.reset_at_ms = now_ms.saturating_add(window_ms);
        }

        RateWindow {
            key: key.to_string(),
            count: state.count,
            reset_at_epoch_ms: state.reset_at_ms,
        }
    }

    /// Returns the live count for `key`, or 0 once its window has expired.
    /// Never mutates state.
    pub fn get(&self, key: &str, now_ms: u64) -> u64 {
        self.window(key, now_ms).map_or(0, |window| window.count)
    }

    /// Returns the live window for `key`, if any.
    pub fn window(&self, key: &str, now_ms: u64) -> Option<RateWindow> {
        let state = self.windows.get(key)?;
        if !state.is_active(now_ms) {
            return None;
        }
        Some(RateWindow {
            key: key.to_string(),
            count: state.count,
            reset_at_epoch_ms: state.reset_at_ms,
        })
    }

    /// Evicts every window with `resetAt <= now` and returns how many were
    /// removed.
    ///
    /// Expired keys are snapshotted first; each removal then re-checks the
    /// expiry under the key's shard lock.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .windows
            .iter()
            .filter(|entry| !entry.value().is_active(now_ms))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| {
                self.windows
                    .remove_if(key, |_, state| !state.is_active(now_ms))
                    .is_some()
            })
            .count()
    }

    /// Number of tracked keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::RateLimiterStore;
    use std::sync::Arc;
    use std::thread;

    const WINDOW_MS: u64 = 60_000;

    #[test]
    fn increments_within_window_then_resets() {
        let store = RateLimiterStore::new();
        let counts: Vec<u64> = (0..6)
            .map(|offset| store.increment("ip:1", WINDOW_MS, 1_000 + offset).count)
            .collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5, 6]);

        let window = store.increment("ip:1", WINDOW_MS, 61_000);
        assert_eq!(window.count, 1);
        assert_eq!(window.reset_at_epoch_ms, 121_000);
    }

    #[test]
    fn get_is_read_only_and_zero_after_expiry() {
        let store = RateLimiterStore::new();
        store.increment("k", WINDOW_MS, 0);
        store.increment("k", WINDOW_MS, 10);
        assert_eq!(store.get("k", 59_999), 2);
        assert_eq!(store.get("k", 60_000), 0);
        assert_eq!(store.get("missing", 0), 0);
        // Expired entry is still tracked until swept.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sweep_removes_only_expired_windows() {
        let store = RateLimiterStore::new();
        store.increment("old", 1_000, 0);
        store.increment("fresh", 1_000, 900);

        assert_eq!(store.sweep(1_000), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("fresh", 1_000), 1);
        assert_eq!(store.sweep(1_000), 0);
    }

    #[test]
    fn concurrent_increments_on_one_key_are_not_lost() {
        let store = Arc::new(RateLimiterStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..250 {
                        store.increment("shared", WINDOW_MS, 5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared", 5), 2_000);
    }
}
