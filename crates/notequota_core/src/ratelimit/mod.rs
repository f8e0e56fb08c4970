//! Fixed-window request rate limiting.
//!
//! # Responsibility
//! - Count requests per caller key inside fixed windows (`store`).
//! - Turn counts into allow/reject decisions and response headers (`gate`).
//! - Evict expired windows on an independent timer (`sweeper`).
//!
//! # Invariants
//! - Mutation of one key's window happens under that key's shard lock only;
//!   requests for unrelated keys do not serialize on a global lock.
//! - Eviction re-checks expiry under the shard lock, so a window renewed by a
//!   concurrent increment is never dropped.

mod gate;
mod store;
mod sweeper;

pub use gate::{RateDecision, RateLimitGate};
pub use store::{RateLimiterStore, RateWindow};
pub use sweeper::SweeperHandle;
