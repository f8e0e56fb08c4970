//! Ledger audit and explicitly audited repair.
//!
//! # Responsibility
//! - Compare stored counters with counts recomputed from live rows.
//! - Overwrite drifted counters on operator request, logging before and
//!   after values.
//!
//! # Invariants
//! - `audit` never writes.
//! - `repair` is the only path that sets counters to absolute values, and it
//!   only ever sets them to the live recount.

use crate::config::RetryPolicy;
use crate::error::{QuotaError, QuotaResult};
use crate::model::ledger::{AccountId, EntityRef, ModuleId};
use crate::repo::ledger_repo::{from_db_int, live_totals, load_account, parse_uuid};
use crate::repo::ledger_writes::{overwrite_account_counters, overwrite_module_note_count};
use crate::service::retry::with_retry;
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;

/// Account-level counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub module_count: u64,
    pub note_count: u64,
    pub storage_used_bytes: u64,
}

/// One module whose stored `noteCount` disagrees with its live notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDrift {
    pub module_id: ModuleId,
    pub recorded: u64,
    pub live: u64,
}

/// Difference between stored counters and live rows for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDrift {
    pub account_id: AccountId,
    pub recorded: CounterSnapshot,
    pub live: CounterSnapshot,
    pub modules: Vec<ModuleDrift>,
}

impl LedgerDrift {
    pub fn is_clean(&self) -> bool {
        self.recorded == self.live && self.modules.is_empty()
    }
}

/// Audits and repairs ledger counters.
pub struct LedgerAuditor<'conn> {
    conn: &'conn Connection,
    retry: RetryPolicy,
}

impl<'conn> LedgerAuditor<'conn> {
    pub fn new(conn: &'conn Connection, retry: RetryPolicy) -> Self {
        Self { conn, retry }
    }

    /// Reports drift from one consistent snapshot.
    pub fn audit(&self, account_id: AccountId) -> QuotaResult<LedgerDrift> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        let drift = compute_drift(&tx, account_id)?;
        tx.commit()?;
        Ok(drift)
    }

    /// Recomputes counters from live rows and overwrites the drifted ones.
    ///
    /// Returns the drift that was found. A clean ledger is left untouched.
    pub fn repair(&self, account_id: AccountId) -> QuotaResult<LedgerDrift> {
        let drift = with_retry(&self.retry, "ledger_repair", || {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
            let drift = compute_drift(&tx, account_id)?;
            if drift.is_clean() {
                return Ok(drift);
            }
            overwrite_account_counters(
                &tx,
                account_id,
                drift.live.module_count,
                drift.live.note_count,
                drift.live.storage_used_bytes,
            )?;
            for module in &drift.modules {
                overwrite_module_note_count(&tx, module.module_id, module.live)?;
            }
            tx.commit()?;
            Ok(drift)
        })?;

        if drift.is_clean() {
            info!(
                "event=ledger_repair module=audit status=ok account_id={} changed=false",
                account_id
            );
            return Ok(drift);
        }
        warn!(
            "event=ledger_repair module=audit status=ok account_id={} changed=true before_modules={} after_modules={} before_notes={} after_notes={} before_bytes={} after_bytes={} modules_fixed={}",
            account_id,
            drift.recorded.module_count,
            drift.live.module_count,
            drift.recorded.note_count,
            drift.live.note_count,
            drift.recorded.storage_used_bytes,
            drift.live.storage_used_bytes,
            drift.modules.len()
        );
        Ok(drift)
    }
}

fn compute_drift(conn: &Connection, account_id: AccountId) -> QuotaResult<LedgerDrift> {
    let account = load_account(conn, account_id)?
        .ok_or(QuotaError::NotFound(EntityRef::account(account_id)))?;
    let totals = live_totals(conn, account_id)?;

    let mut modules = Vec::new();
    let mut stmt =
        conn.prepare("SELECT id, note_count FROM modules WHERE account_id = ?1 ORDER BY id;")?;
    let mut rows = stmt.query([account_id.to_string()])?;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let recorded: i64 = row.get(1)?;
        let module_id = parse_uuid(&id, "modules.id")?;
        let recorded = from_db_int(recorded, "modules.note_count")?;
        let live = totals
            .notes_per_module
            .get(&module_id)
            .copied()
            .unwrap_or(0);
        if recorded != live {
            modules.push(ModuleDrift {
                module_id,
                recorded,
                live,
            });
        }
    }

    Ok(LedgerDrift {
        account_id,
        recorded: CounterSnapshot {
            module_count: account.module_count,
            note_count: account.note_count,
            storage_used_bytes: account.storage_used_bytes,
        },
        live: CounterSnapshot {
            module_count: totals.module_count,
            note_count: totals.note_count,
            storage_used_bytes: totals.storage_used_bytes,
        },
        modules,
    })
}
