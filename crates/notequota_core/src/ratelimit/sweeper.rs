//! Background eviction of expired windows.

use super::store::RateLimiterStore;
use crate::clock::Clock;
use log::{debug, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Owns the sweeper thread. Dropping the handle stops the thread.
pub struct SweeperHandle {
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes `recv_timeout` with `Disconnected`.
        self.stop_tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RateLimiterStore {
    /// Spawns a thread that calls `sweep` every `interval`.
    ///
    /// # Errors
    /// - Returns the OS error when the thread cannot be spawned.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> std::io::Result<SweeperHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let store = Arc::clone(self);

        let join = thread::Builder::new()
            .name("notequota-rate-sweep".to_string())
            .spawn(move || {
                info!(
                    "event=rate_sweep module=rate_limit status=start interval_ms={}",
                    interval.as_millis()
                );
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let evicted = store.sweep(clock.now_ms());
                            if evicted > 0 {
                                debug!(
                                    "event=rate_sweep module=rate_limit status=ok evicted={} remaining={}",
                                    evicted,
                                    store.len()
                                );
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("event=rate_sweep module=rate_limit status=stopped");
            })?;

        Ok(SweeperHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
        })
    }
}
