//! Cascade deletes of modules and accounts.
//!
//! # Responsibility
//! - Enumerate a parent's children page by page and accumulate the counter
//!   delta locally.
//! - Apply the child deletes, the parent delete and one account update in a
//!   single final transaction.
//! - Delete released storage objects best-effort after commit.
//!
//! # Invariants
//! - Enumeration is read-only and may be repeated safely.
//! - The final transaction re-verifies the enumerated totals under the write
//!   lock. A mismatch (a concurrent insert or delete) rolls back and the
//!   cascade starts over, so the applied delta always matches the rows
//!   removed.
//! - A failure anywhere before commit leaves the ledger in its full
//!   pre-state.
//! - Object cleanup failures never fail the cascade; they are logged and
//!   left for the reconciler.

use crate::config::RetryPolicy;
use crate::error::{QuotaError, QuotaResult};
use crate::model::ledger::{AccountId, EntityRef, ModuleId, NoteId};
use crate::repo::ledger_repo::{
    live_totals, load_account, load_module, LedgerRepository, NotePage, SqliteLedgerRepository,
};
use crate::repo::ledger_writes::{
    apply_account_delta, compact_module_positions, count_module_notes, delete_account_children,
    delete_account_row, delete_module_row, delete_notes_of_module, module_media_bytes,
    AccountDelta,
};
use crate::service::mutator::signed;
use crate::service::retry::with_retry;
use crate::storage::ObjectStore;
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Instant;

/// Outcome of one committed cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub entity: EntityRef,
    pub account_id: AccountId,
    pub modules_deleted: u64,
    pub notes_deleted: u64,
    pub bytes_released: u64,
    pub objects_deleted: u64,
    /// Objects whose deletion failed. The reconciler picks them up later.
    pub cleanup_failures: u64,
}

/// Children of one module gathered during enumeration.
#[derive(Debug, Default)]
struct ModuleChildren {
    note_ids: Vec<NoteId>,
    bytes: u64,
    storage_paths: Vec<String>,
}

/// Deletes parents together with their children.
pub struct CascadeDeleter<'conn, 'a> {
    conn: &'conn Connection,
    store: &'a dyn ObjectStore,
    retry: RetryPolicy,
    page_size: u32,
}

impl<'conn, 'a> CascadeDeleter<'conn, 'a> {
    pub fn new(
        conn: &'conn Connection,
        store: &'a dyn ObjectStore,
        retry: RetryPolicy,
        page_size: u32,
    ) -> Self {
        Self {
            conn,
            store,
            retry,
            page_size: page_size.max(1),
        }
    }

    /// Deletes one module with all of its notes and their media.
    ///
    /// Applies `moduleCount -= 1`, `noteCount -= n` and
    /// `storageUsedBytes -= bytes` to the owning account in one step.
    pub fn delete_module(&self, module_id: ModuleId) -> QuotaResult<CascadeReport> {
        let started_at = Instant::now();
        info!(
            "event=cascade_delete module=cascade status=start kind=module id={}",
            module_id
        );
        let result = self.run_until_stable("delete_module", || self.delete_module_once(module_id));
        let (report, paths) = match result {
            Ok(done) => done,
            Err(err) => {
                error!(
                    "event=cascade_delete module=cascade status=error kind=module id={} error_code={} error={}",
                    module_id,
                    err.code(),
                    err
                );
                return Err(err);
            }
        };
        Ok(self.finish(report, &paths, started_at))
    }

    /// Deletes an account, every module and note it owns, and its ledger row.
    pub fn delete_account(&self, account_id: AccountId) -> QuotaResult<CascadeReport> {
        let started_at = Instant::now();
        info!(
            "event=cascade_delete module=cascade status=start kind=account id={}",
            account_id
        );
        let result =
            self.run_until_stable("delete_account", || self.delete_account_once(account_id));
        let (report, paths) = match result {
            Ok(done) => done,
            Err(err) => {
                error!(
                    "event=cascade_delete module=cascade status=error kind=account id={} error_code={} error={}",
                    account_id,
                    err.code(),
                    err
                );
                return Err(err);
            }
        };
        Ok(self.finish(report, &paths, started_at))
    }

    /// Repeats `attempt` while the enumeration goes stale under it.
    ///
    /// `Ok(None)` from `attempt` means the final transaction saw different
    /// totals than the enumeration and rolled back.
    fn run_until_stable(
        &self,
        operation: &'static str,
        mut attempt: impl FnMut() -> QuotaResult<Option<(CascadeReport, Vec<String>)>>,
    ) -> QuotaResult<(CascadeReport, Vec<String>)> {
        let budget = self.retry.max_retries + 1;
        for round in 1..=budget {
            if let Some(done) = with_retry(&self.retry, operation, &mut attempt)? {
                return Ok(done);
            }
            warn!(
                "event=cascade_delete module=cascade status=retry op={} attempt={} reason=stale_enumeration",
                operation, round
            );
        }
        Err(QuotaError::Conflict { attempts: budget })
    }

    fn delete_module_once(
        &self,
        module_id: ModuleId,
    ) -> QuotaResult<Option<(CascadeReport, Vec<String>)>> {
        let module = load_module(self.conn, module_id)?
            .ok_or(QuotaError::NotFound(EntityRef::module(module_id)))?;
        let children = self.enumerate_module(module_id)?;
        let note_count = children.note_ids.len() as u64;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let current = load_module(&tx, module_id)?
            .ok_or(QuotaError::NotFound(EntityRef::module(module_id)))?;
        if count_module_notes(&tx, module_id)? != note_count
            || module_media_bytes(&tx, module_id)? != children.bytes
        {
            return Ok(None);
        }

        let removed = delete_notes_of_module(&tx, module_id, &children.note_ids)?;
        if removed as u64 != note_count || count_module_notes(&tx, module_id)? != 0 {
            return Ok(None);
        }
        delete_module_row(&tx, module_id)?;
        compact_module_positions(&tx, current.account_id, current.position)?;
        let applied = apply_account_delta(
            &tx,
            current.account_id,
            AccountDelta {
                modules: -1,
                notes: -signed(note_count)?,
                storage_bytes: -signed(children.bytes)?,
            },
        )?;
        if !applied {
            return Err(QuotaError::NotFound(EntityRef::account(current.account_id)));
        }
        tx.commit()?;

        Ok(Some((
            CascadeReport {
                entity: EntityRef::module(module_id),
                account_id: module.account_id,
                modules_deleted: 1,
                notes_deleted: note_count,
                bytes_released: children.bytes,
                objects_deleted: 0,
                cleanup_failures: 0,
            },
            children.storage_paths,
        )))
    }

    fn delete_account_once(
        &self,
        account_id: AccountId,
    ) -> QuotaResult<Option<(CascadeReport, Vec<String>)>> {
        load_account(self.conn, account_id)?
            .ok_or(QuotaError::NotFound(EntityRef::account(account_id)))?;
        let repo = SqliteLedgerRepository::try_new(self.conn)?;
        let modules = repo.list_modules(account_id)?;

        let mut note_count: u64 = 0;
        let mut bytes: u64 = 0;
        let mut paths = Vec::new();
        for module in &modules {
            let children = self.enumerate_module(module.id)?;
            note_count += children.note_ids.len() as u64;
            bytes += children.bytes;
            paths.extend(children.storage_paths);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let totals = live_totals(&tx, account_id)?;
        if totals.module_count != modules.len() as u64
            || totals.note_count != note_count
            || totals.storage_used_bytes != bytes
        {
            return Ok(None);
        }
        delete_account_children(&tx, account_id)?;
        if !delete_account_row(&tx, account_id)? {
            return Err(QuotaError::NotFound(EntityRef::account(account_id)));
        }
        tx.commit()?;

        Ok(Some((
            CascadeReport {
                entity: EntityRef::account(account_id),
                account_id,
                modules_deleted: modules.len() as u64,
                notes_deleted: note_count,
                bytes_released: bytes,
                objects_deleted: 0,
                cleanup_failures: 0,
            },
            paths,
        )))
    }

    /// Pages through a module's notes by position.
    fn enumerate_module(&self, module_id: ModuleId) -> QuotaResult<ModuleChildren> {
        let repo = SqliteLedgerRepository::try_new(self.conn)?;
        let mut children = ModuleChildren::default();
        let mut after_position = None;
        loop {
            let page = repo.list_notes_page(
                module_id,
                NotePage {
                    after_position,
                    limit: self.page_size,
                },
            )?;
            let Some(last) = page.last() else {
                break;
            };
            after_position = Some(last.position);
            let full_page = page.len() as u32 == self.page_size;
            for note in page {
                children.bytes += note.media_bytes();
                children.note_ids.push(note.id);
                children
                    .storage_paths
                    .extend(note.media_files.into_iter().map(|media| media.storage_path));
            }
            if !full_page {
                break;
            }
        }
        Ok(children)
    }

    fn finish(
        &self,
        mut report: CascadeReport,
        paths: &[String],
        started_at: Instant,
    ) -> CascadeReport {
        let outcome = delete_objects_best_effort(self.store, paths);
        report.objects_deleted = outcome.deleted;
        report.cleanup_failures = outcome.failed;
        info!(
            "event=cascade_delete module=cascade status=ok kind={} id={} account_id={} modules={} notes={} bytes={} objects_deleted={} cleanup_failures={} duration_ms={}",
            report.entity.kind.as_str(),
            report.entity.id,
            report.account_id,
            report.modules_deleted,
            report.notes_deleted,
            report.bytes_released,
            report.objects_deleted,
            report.cleanup_failures,
            started_at.elapsed().as_millis()
        );
        report
    }
}

/// Counts from a best-effort object cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub deleted: u64,
    pub failed: u64,
}

/// Deletes each path, logging failures instead of returning them.
pub fn delete_objects_best_effort(store: &dyn ObjectStore, paths: &[String]) -> CleanupOutcome {
    let mut outcome = CleanupOutcome::default();
    for path in paths {
        match store.delete(path) {
            Ok(true) => outcome.deleted += 1,
            Ok(false) => {}
            Err(err) => {
                outcome.failed += 1;
                warn!(
                    "event=media_cleanup_failed module=cascade status=error path={} error={}",
                    path, err
                );
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::{delete_objects_best_effort, CascadeDeleter};
    use crate::config::RetryPolicy;
    use crate::db::open_db_in_memory;
    use crate::error::QuotaError;
    use crate::service::mutator::{CreateRequest, TransactionalMutator};
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use uuid::Uuid;

    #[test]
    fn enumeration_pages_through_every_note() {
        let conn = open_db_in_memory().unwrap();
        let store = MemoryObjectStore::new();
        let mutator = TransactionalMutator::new(&conn, RetryPolicy::default());
        let account = mutator
            .create(&CreateRequest::Account {
                tier: "pro".to_string(),
            })
            .unwrap()
            .entity
            .id;
        let module = mutator
            .create(&CreateRequest::Module { account_id: account })
            .unwrap()
            .entity
            .id;
        for _ in 0..7 {
            mutator
                .create(&CreateRequest::Note {
                    account_id: account,
                    module_id: module,
                })
                .unwrap();
        }

        let deleter = CascadeDeleter::new(&conn, &store, RetryPolicy::default(), 3);
        let report = deleter.delete_module(module).unwrap();
        assert_eq!(report.notes_deleted, 7);
        assert_eq!(report.modules_deleted, 1);
    }

    #[test]
    fn missing_module_is_not_found() {
        let conn = open_db_in_memory().unwrap();
        let store = MemoryObjectStore::new();
        let deleter = CascadeDeleter::new(&conn, &store, RetryPolicy::default(), 10);
        assert!(matches!(
            deleter.delete_module(Uuid::new_v4()),
            Err(QuotaError::NotFound(_))
        ));
    }

    #[test]
    fn best_effort_cleanup_skips_absent_objects() {
        let store = MemoryObjectStore::new();
        store.put("accounts/a/notes/n/m1", b"abc").unwrap();
        let outcome = delete_objects_best_effort(
            &store,
            &[
                "accounts/a/notes/n/m1".to_string(),
                "accounts/a/notes/n/gone".to_string(),
            ],
        );
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.failed, 0);
    }
}
