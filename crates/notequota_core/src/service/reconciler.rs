//! Orphan reconciliation: Scan → Diff → Delete → Report.
//!
//! # Responsibility
//! - Remove storage objects under an account's prefix that no live note
//!   references.
//! - Report referenced objects that are missing, deletes that failed, and
//!   ledger drift, without fixing any of them.
//!
//! # Invariants
//! - Never touches ledger counters.
//! - Idempotent: a second pass with no intervening writes deletes nothing.
//! - Safe to run for an account whose ledger row is already gone.
//! - Unreferenced objects younger than `min_orphan_age_ms` are deferred,
//!   not deleted: an in-flight upload writes its object before the ledger
//!   row commits.

use crate::clock::{Clock, SystemClock};
use crate::config::RetryPolicy;
use crate::error::QuotaResult;
use crate::model::ledger::{account_storage_prefix, AccountId, MediaId};
use crate::repo::ledger_repo::{load_account, LedgerRepository, SqliteLedgerRepository};
use crate::service::audit::{LedgerAuditor, LedgerDrift};
use crate::storage::ObjectStore;
use log::{info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Drift found by a reconciliation pass. Reported, never auto-fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageInconsistency {
    /// A live note references an object the store does not hold.
    #[serde(rename_all = "camelCase")]
    MissingObject { media_id: MediaId, storage_path: String },
    /// An unreferenced object could not be deleted.
    #[serde(rename_all = "camelCase")]
    DeleteFailed { storage_path: String, error: String },
    /// Stored counters disagree with live rows.
    LedgerDrift(LedgerDrift),
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub account_id: AccountId,
    pub deleted_count: u64,
    pub bytes_recovered: u64,
    /// Unreferenced objects left for a later pass because they are too new.
    pub deferred_count: u64,
    pub inconsistencies: Vec<StorageInconsistency>,
}

/// Removes unreferenced objects for one account at a time.
pub struct OrphanReconciler<'conn, 'a> {
    conn: &'conn Connection,
    store: &'a dyn ObjectStore,
    storage_prefix: &'a str,
    clock: &'a dyn Clock,
    min_orphan_age_ms: u64,
    retry: RetryPolicy,
}

impl<'conn, 'a> OrphanReconciler<'conn, 'a> {
    pub fn new(
        conn: &'conn Connection,
        store: &'a dyn ObjectStore,
        storage_prefix: &'a str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            conn,
            store,
            storage_prefix,
            clock: &SystemClock,
            min_orphan_age_ms: 0,
            retry,
        }
    }

    /// Defers unreferenced objects written less than `min_age_ms` before
    /// `clock.now_ms()`.
    pub fn with_min_age(mut self, clock: &'a dyn Clock, min_age_ms: u64) -> Self {
        self.clock = clock;
        self.min_orphan_age_ms = min_age_ms;
        self
    }

    pub fn reconcile(&self, account_id: AccountId) -> QuotaResult<ReconcileReport> {
        let started_at = Instant::now();
        info!(
            "event=reconcile module=reconciler status=start account_id={}",
            account_id
        );

        // Scan
        let repo = SqliteLedgerRepository::try_new(self.conn)?;
        let referenced: BTreeMap<String, MediaId> = repo
            .list_account_media(account_id)?
            .into_iter()
            .map(|media| (media.storage_path, media.id))
            .collect();
        let prefix = account_storage_prefix(self.storage_prefix, account_id);
        let objects = self.store.list(&prefix)?;

        // Diff
        let present: BTreeSet<&str> = objects.iter().map(|object| object.path.as_str()).collect();
        let mut inconsistencies = Vec::new();
        for (path, media_id) in &referenced {
            if !present.contains(path.as_str()) {
                inconsistencies.push(StorageInconsistency::MissingObject {
                    media_id: *media_id,
                    storage_path: path.clone(),
                });
            }
        }
        let now_ms = self.clock.now_ms();
        let (orphans, deferred): (Vec<_>, Vec<_>) = objects
            .into_iter()
            .filter(|object| !referenced.contains_key(&object.path))
            .partition(|object| {
                now_ms.saturating_sub(object.modified_at_ms) >= self.min_orphan_age_ms
            });
        let deferred_count = deferred.len() as u64;

        // Delete
        let mut deleted_count = 0;
        let mut bytes_recovered = 0;
        for orphan in orphans {
            match self.store.delete(&orphan.path) {
                Ok(true) => {
                    deleted_count += 1;
                    bytes_recovered += orphan.size_bytes;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        "event=media_cleanup_failed module=reconciler status=error account_id={} path={} error={}",
                        account_id, orphan.path, err
                    );
                    inconsistencies.push(StorageInconsistency::DeleteFailed {
                        storage_path: orphan.path,
                        error: err.to_string(),
                    });
                }
            }
        }

        // Report
        if load_account(self.conn, account_id)?.is_some() {
            let drift = LedgerAuditor::new(self.conn, self.retry).audit(account_id)?;
            if !drift.is_clean() {
                inconsistencies.push(StorageInconsistency::LedgerDrift(drift));
            }
        }

        info!(
            "event=reconcile module=reconciler status=ok account_id={} deleted_count={} bytes_recovered={} deferred_count={} inconsistencies={} duration_ms={}",
            account_id,
            deleted_count,
            bytes_recovered,
            deferred_count,
            inconsistencies.len(),
            started_at.elapsed().as_millis()
        );
        Ok(ReconcileReport {
            account_id,
            deleted_count,
            bytes_recovered,
            deferred_count,
            inconsistencies,
        })
    }
}
