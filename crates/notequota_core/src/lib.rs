//! Hierarchical quota and usage accounting for a multi-tenant notes service,
//! paired with a fixed-window request rate limiter.
//!
//! Accounts own modules, modules own notes, notes own media. The engine keeps
//! per-account and per-module counters consistent with live rows, enforces
//! tier limits before every create, and reconciles storage debris left by
//! partial failures.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod ratelimit;
pub mod repo;
pub mod service;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig, RateLimitConfig, RetryPolicy};
pub use db::{open_db, open_db_in_memory, DbError};
pub use engine::{EngineContext, QuotaEngine, UploadRequest};
pub use error::{QuotaError, QuotaResource, QuotaResult};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status, LogSink};
pub use model::ledger::{
    Account, AccountId, EntityKind, EntityRef, MediaId, MediaRef, Module, ModuleId, Note, NoteId,
};
pub use model::tier::{builtin_tiers, Limit, TierPolicy, TierPolicyTable};
pub use ratelimit::{RateDecision, RateLimitGate, RateLimiterStore, RateWindow, SweeperHandle};
pub use repo::ledger_repo::{
    LedgerRepository, LiveTotals, NotePage, RepoError, RepoResult, SqliteLedgerRepository,
};
pub use service::admission::{AdmissionController, AdmissionDecision, AdmissionQuery};
pub use service::audit::{CounterSnapshot, LedgerAuditor, LedgerDrift, ModuleDrift};
pub use service::cascade::{CascadeDeleter, CascadeReport, CleanupOutcome};
pub use service::mutator::{
    AdmissionGuard, CreateRequest, Created, Deleted, NewMedia, TransactionalMutator,
};
pub use service::reconciler::{OrphanReconciler, ReconcileReport, StorageInconsistency};
pub use service::usage::{format_bytes, format_limit_bytes, UsageReport};
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectEntry, ObjectStore, StorageError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
