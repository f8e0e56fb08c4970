//! Engine context and per-connection facade.
//!
//! # Responsibility
//! - Build the process-wide context (config, tier table, rate-limit store,
//!   object store, clock) once and share it by reference.
//! - Route each mutation through rate gate → admission → mutator, and parent
//!   deletes through the cascade deleter.
//!
//! # Invariants
//! - Admission is strict: the pre-flight check gives a fast rejection and the
//!   mutator re-checks the same limit inside its write transaction.
//! - Uploads store the object before the ledger commit. A failed commit
//!   leaves an orphan for the reconciler, never a dangling reference.
//! - Tier names passed in by callers must exist in the tier table.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, EngineConfig};
use crate::error::{QuotaError, QuotaResult};
use crate::model::ledger::{
    media_storage_path, Account, AccountId, EntityKind, EntityRef, MediaId, MediaRef, Module,
    ModuleId, Note, NoteId,
};
use crate::model::tier::{normalize_tier_name, TierPolicyTable};
use crate::ratelimit::{RateDecision, RateLimitGate, RateLimiterStore, SweeperHandle};
use crate::repo::ledger_repo::{LedgerRepository, SqliteLedgerRepository};
use crate::service::admission::{AdmissionController, AdmissionDecision, AdmissionQuery};
use crate::service::audit::{LedgerAuditor, LedgerDrift};
use crate::service::cascade::{delete_objects_best_effort, CascadeDeleter, CascadeReport};
use crate::service::mutator::{
    AdmissionGuard, CreateRequest, Deleted, NewMedia, TransactionalMutator,
};
use crate::service::reconciler::{OrphanReconciler, ReconcileReport};
use crate::service::usage::{usage_report, UsageReport};
use crate::storage::ObjectStore;
use log::{error, info};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Process-wide engine state, built once at start-up.
pub struct EngineContext {
    config: Arc<EngineConfig>,
    tiers: TierPolicyTable,
    rate_limiter: Arc<RateLimiterStore>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
}

impl EngineContext {
    /// Validates `config` and builds a context on the system clock.
    pub fn new(config: EngineConfig, store: Arc<dyn ObjectStore>) -> Result<Self, ConfigError> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tiers = config.tier_table()?;
        info!(
            "event=engine_init module=engine status=ok tiers={} default_tier={}",
            tiers.policies().count(),
            tiers.default_tier()
        );
        Ok(Self {
            config: Arc::new(config),
            tiers,
            rate_limiter: Arc::new(RateLimiterStore::new()),
            store,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tiers(&self) -> &TierPolicyTable {
        &self.tiers
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiterStore> {
        &self.rate_limiter
    }

    pub fn object_store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn rate_gate(&self) -> RateLimitGate {
        RateLimitGate::new(Arc::clone(&self.rate_limiter), Arc::clone(&self.clock))
    }

    /// Starts the periodic eviction of expired rate windows.
    pub fn spawn_rate_sweeper(&self) -> std::io::Result<SweeperHandle> {
        self.rate_limiter.spawn_sweeper(
            Arc::clone(&self.clock),
            Duration::from_millis(self.config.rate_limit.sweep_interval_ms),
        )
    }

    /// Binds the context to one migrated connection.
    pub fn engine<'a>(&'a self, conn: &'a Connection) -> QuotaResult<QuotaEngine<'a>> {
        Ok(QuotaEngine {
            ctx: self,
            conn,
            repo: SqliteLedgerRepository::try_new(conn)?,
            caller_key: None,
        })
    }
}

/// Upload input. `data` is written to the object store verbatim.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub account_id: AccountId,
    pub note_id: NoteId,
    pub mime_type: &'a str,
    pub data: &'a [u8],
}

/// Engine operations over one connection.
pub struct QuotaEngine<'a> {
    ctx: &'a EngineContext,
    conn: &'a Connection,
    repo: SqliteLedgerRepository<'a>,
    caller_key: Option<String>,
}

impl<'a> QuotaEngine<'a> {
    /// Gates every later mutation on the rate window of `key`.
    pub fn for_caller(mut self, key: impl Into<String>) -> Self {
        self.caller_key = Some(key.into());
        self
    }

    /// Records one request against an arbitrary window.
    pub fn check_rate(&self, key: &str, window_ms: u64, max_per_window: u64) -> RateDecision {
        self.ctx.rate_gate().check(key, window_ms, max_per_window)
    }

    pub fn can_create_module(&self, account_id: AccountId) -> QuotaResult<AdmissionDecision> {
        self.admission().can_create_module(account_id)
    }

    pub fn can_create_note(
        &self,
        account_id: AccountId,
        module_id: ModuleId,
    ) -> QuotaResult<AdmissionDecision> {
        self.admission().can_create_note(account_id, module_id)
    }

    pub fn can_upload_media(
        &self,
        account_id: AccountId,
        candidate_bytes: u64,
    ) -> QuotaResult<AdmissionDecision> {
        self.admission().can_upload_media(account_id, candidate_bytes)
    }

    pub fn admission_query(&self, query: AdmissionQuery) -> QuotaResult<AdmissionDecision> {
        self.admission().check(query)
    }

    /// Creates an account on `tier`, or on the default tier when `None`.
    pub fn create_account(&self, tier: Option<&str>) -> QuotaResult<Account> {
        self.throttle()?;
        let tier = match tier {
            Some(name) => self.known_tier(name)?,
            None => self.ctx.tiers.default_tier().to_string(),
        };
        let created = self.mutator().create(&CreateRequest::Account { tier: tier.clone() })?;
        // Built from committed values; the row may already be gone.
        Ok(Account {
            id: created.entity.id,
            tier,
            module_count: 0,
            note_count: 0,
            storage_used_bytes: 0,
        })
    }

    /// Deletes an account with everything it owns.
    pub fn delete_account(&self, account_id: AccountId) -> QuotaResult<CascadeReport> {
        self.throttle()?;
        self.cascade().delete_account(account_id)
    }

    pub fn create_module(&self, account_id: AccountId) -> QuotaResult<Module> {
        self.throttle()?;
        self.can_create_module(account_id)?.into_result(account_id)?;
        let created = self
            .mutator()
            .create(&CreateRequest::Module { account_id })?;
        Ok(Module {
            id: created.entity.id,
            account_id,
            note_count: 0,
            position: created.position,
        })
    }

    pub fn delete_module(&self, module_id: ModuleId) -> QuotaResult<CascadeReport> {
        self.throttle()?;
        self.cascade().delete_module(module_id)
    }

    pub fn create_note(&self, account_id: AccountId, module_id: ModuleId) -> QuotaResult<Note> {
        self.throttle()?;
        self.can_create_note(account_id, module_id)?
            .into_result(account_id)?;
        let created = self.mutator().create(&CreateRequest::Note {
            account_id,
            module_id,
        })?;
        Ok(Note {
            id: created.entity.id,
            module_id,
            account_id,
            position: created.position,
            media_files: Vec::new(),
        })
    }

    pub fn delete_note(&self, note_id: NoteId) -> QuotaResult<Deleted> {
        self.throttle()?;
        let deleted = self.mutator().delete(EntityKind::Note, note_id)?;
        delete_objects_best_effort(self.ctx.object_store(), &deleted.released_paths);
        Ok(deleted)
    }

    /// Stores the object, then commits the media row and storage delta.
    ///
    /// # Errors
    /// - `UnsupportedMediaType` when the type check fails.
    /// - `NotFound` / `Unauthorized` for a missing or foreign note.
    /// - `QuotaExceeded` for the storage budget or the per-file ceiling.
    /// - `Storage` when the object write fails; the ledger is untouched.
    pub fn upload_media(&self, request: UploadRequest<'_>) -> QuotaResult<MediaRef> {
        self.throttle()?;
        if !self.ctx.config.is_mime_allowed(request.mime_type) {
            return Err(QuotaError::UnsupportedMediaType(
                request.mime_type.to_string(),
            ));
        }
        let note = self.note(request.note_id)?;
        if note.account_id != request.account_id {
            return Err(QuotaError::Unauthorized {
                account_id: request.account_id,
                module_id: note.module_id,
            });
        }
        let size_bytes = request.data.len() as u64;
        self.can_upload_media(request.account_id, size_bytes)?
            .into_result(request.account_id)?;

        let media_id: MediaId = Uuid::new_v4();
        let storage_path = media_storage_path(
            &self.ctx.config.storage_prefix,
            request.account_id,
            request.note_id,
            media_id,
        );
        self.ctx.store.put(&storage_path, request.data)?;

        let media = NewMedia {
            id: media_id,
            storage_path,
            size_bytes,
            mime_type: request.mime_type.trim().to_ascii_lowercase(),
        };
        let created = self.mutator().create(&CreateRequest::Media {
            account_id: request.account_id,
            note_id: request.note_id,
            media: media.clone(),
        });
        if let Err(err) = created {
            error!(
                "event=mutation_commit module=engine status=error op=upload_media account_id={} orphan_path={} error_code={}",
                request.account_id,
                media.storage_path,
                err.code()
            );
            return Err(err);
        }

        Ok(MediaRef {
            id: media.id,
            storage_path: media.storage_path,
            size_bytes: media.size_bytes,
            mime_type: media.mime_type,
        })
    }

    pub fn delete_media(&self, media_id: MediaId) -> QuotaResult<Deleted> {
        self.throttle()?;
        let deleted = self.mutator().delete(EntityKind::Media, media_id)?;
        delete_objects_best_effort(self.ctx.object_store(), &deleted.released_paths);
        Ok(deleted)
    }

    /// Swaps the account's tier. Limits apply prospectively.
    pub fn change_tier(&self, account_id: AccountId, new_tier: &str) -> QuotaResult<Account> {
        self.throttle()?;
        let tier = self.known_tier(new_tier)?;
        self.mutator().change_tier(account_id, &tier)?;
        self.account(account_id)
    }

    pub fn usage(&self, account_id: AccountId) -> QuotaResult<UsageReport> {
        usage_report(&self.repo, &self.ctx.tiers, account_id)
    }

    pub fn reconcile(&self, account_id: AccountId) -> QuotaResult<ReconcileReport> {
        OrphanReconciler::new(
            self.conn,
            self.ctx.object_store(),
            &self.ctx.config.storage_prefix,
            self.ctx.config.retry,
        )
        .with_min_age(self.ctx.clock.as_ref(), self.ctx.config.min_orphan_age_ms)
        .reconcile(account_id)
    }

    pub fn audit(&self, account_id: AccountId) -> QuotaResult<LedgerDrift> {
        LedgerAuditor::new(self.conn, self.ctx.config.retry).audit(account_id)
    }

    pub fn repair(&self, account_id: AccountId) -> QuotaResult<LedgerDrift> {
        LedgerAuditor::new(self.conn, self.ctx.config.retry).repair(account_id)
    }

    pub fn account(&self, account_id: AccountId) -> QuotaResult<Account> {
        self.repo
            .get_account(account_id)?
            .ok_or(QuotaError::NotFound(EntityRef::account(account_id)))
    }

    pub fn module(&self, module_id: ModuleId) -> QuotaResult<Module> {
        self.repo
            .get_module(module_id)?
            .ok_or(QuotaError::NotFound(EntityRef::module(module_id)))
    }

    pub fn note(&self, note_id: NoteId) -> QuotaResult<Note> {
        self.repo
            .get_note(note_id)?
            .ok_or(QuotaError::NotFound(EntityRef::note(note_id)))
    }

    pub fn repository(&self) -> &SqliteLedgerRepository<'a> {
        &self.repo
    }

    fn throttle(&self) -> QuotaResult<()> {
        let Some(key) = self.caller_key.as_deref() else {
            return Ok(());
        };
        let limits = self.ctx.config.rate_limit;
        self.ctx
            .rate_gate()
            .enforce(key, limits.window_ms, limits.max_per_window)?;
        Ok(())
    }

    fn known_tier(&self, name: &str) -> QuotaResult<String> {
        let normalized = normalize_tier_name(name);
        if !self.ctx.tiers.contains(&normalized) {
            return Err(QuotaError::InvalidRequest(format!("unknown tier `{name}`")));
        }
        Ok(normalized)
    }

    fn admission(&self) -> AdmissionController<'a, SqliteLedgerRepository<'a>> {
        AdmissionController::new(
            self.repo,
            &self.ctx.tiers,
            self.ctx.config.absolute_file_size_ceiling_bytes,
        )
    }

    fn mutator(&self) -> TransactionalMutator<'a, 'a> {
        TransactionalMutator::new(self.conn, self.ctx.config.retry).with_guard(
            AdmissionGuard::Enforce {
                tiers: &self.ctx.tiers,
                file_size_ceiling_bytes: self.ctx.config.absolute_file_size_ceiling_bytes,
            },
        )
    }

    fn cascade(&self) -> CascadeDeleter<'a, 'a> {
        CascadeDeleter::new(
            self.conn,
            self.ctx.object_store(),
            self.ctx.config.retry,
            self.ctx.config.cascade_page_size,
        )
    }
}
