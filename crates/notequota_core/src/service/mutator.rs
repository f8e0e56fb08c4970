//! Transactional mutator: entity writes plus counter deltas as one unit.
//!
//! # Responsibility
//! - Create and delete accounts, modules, notes and media rows.
//! - Assign append-to-end positions and compact siblings on delete.
//! - Apply the signed counter delta to the parent and the account ledger in
//!   the same IMMEDIATE transaction as the entity write.
//!
//! # Invariants
//! - Either the entity write, its position and its counter delta all commit,
//!   or none of them do.
//! - Write conflicts are retried with jittered backoff up to the configured
//!   budget, then surface as `Conflict`.
//! - Module and account deletes are refused here; they go through the
//!   cascade deleter.
//! - With `AdmissionGuard::Enforce`, the tier limit is re-read and compared
//!   inside the write transaction, so the last slot is granted to at most
//!   one writer.

use crate::config::RetryPolicy;
use crate::error::{QuotaError, QuotaResult};
use crate::model::ledger::{AccountId, EntityKind, EntityRef, MediaId, ModuleId, NoteId};
use crate::model::tier::TierPolicyTable;
use crate::repo::ledger_repo::{load_account, load_module, load_note, media_owner};
use crate::repo::ledger_writes::{
    apply_account_delta, apply_module_delta, compact_media_positions, compact_note_positions,
    delete_media_row, delete_note_row, insert_account, insert_media, insert_module, insert_note,
    media_position, update_account_tier, AccountDelta, NewMediaRow,
};
use crate::service::admission::{ensure_owner, evaluate_module, evaluate_note, evaluate_upload};
use crate::service::retry::with_retry;
use log::info;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

/// In-transaction admission policy.
#[derive(Debug, Clone, Copy)]
pub enum AdmissionGuard<'a> {
    /// Pure bookkeeping. Callers are responsible for admission.
    Unchecked,
    /// Re-evaluate the tier limit against the counters read inside the
    /// write transaction.
    Enforce {
        tiers: &'a TierPolicyTable,
        file_size_ceiling_bytes: u64,
    },
}

/// Media payload to attach to a note. The object must already be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMedia {
    pub id: MediaId,
    pub storage_path: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Entity to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateRequest {
    Account {
        tier: String,
    },
    Module {
        account_id: AccountId,
    },
    Note {
        account_id: AccountId,
        module_id: ModuleId,
    },
    Media {
        account_id: AccountId,
        note_id: NoteId,
        media: NewMedia,
    },
}

impl CreateRequest {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Account { .. } => EntityKind::Account,
            Self::Module { .. } => EntityKind::Module,
            Self::Note { .. } => EntityKind::Note,
            Self::Media { .. } => EntityKind::Media,
        }
    }
}

/// Result of a committed create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    pub entity: EntityRef,
    /// Position among siblings. Accounts report 0.
    pub position: u64,
}

/// Result of a committed delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    pub entity: EntityRef,
    pub account_id: AccountId,
    pub bytes_released: u64,
    /// Object paths no longer referenced by the ledger. Deletion is the
    /// caller's best-effort job after commit.
    pub released_paths: Vec<String>,
}

/// Applies entity writes and their counter deltas atomically.
pub struct TransactionalMutator<'conn, 'a> {
    conn: &'conn Connection,
    retry: RetryPolicy,
    guard: AdmissionGuard<'a>,
}

impl<'conn, 'a> TransactionalMutator<'conn, 'a> {
    pub fn new(conn: &'conn Connection, retry: RetryPolicy) -> Self {
        Self {
            conn,
            retry,
            guard: AdmissionGuard::Unchecked,
        }
    }

    pub fn with_guard(mut self, guard: AdmissionGuard<'a>) -> Self {
        self.guard = guard;
        self
    }

    /// Creates one entity and applies its counter delta.
    ///
    /// # Errors
    /// - `NotFound` when a parent is missing.
    /// - `Unauthorized` when the parent belongs to another account.
    /// - `QuotaExceeded` when the guard enforces limits and the slot is gone.
    /// - `Conflict` when write conflicts outlast the retry budget.
    pub fn create(&self, request: &CreateRequest) -> QuotaResult<Created> {
        let op = match request.kind() {
            EntityKind::Account => "create_account",
            EntityKind::Module => "create_module",
            EntityKind::Note => "create_note",
            EntityKind::Media => "create_media",
        };
        let created = with_retry(&self.retry, op, || self.create_once(request))?;
        info!(
            "event=mutation_commit module=mutator status=ok op={} {}={} position={}",
            op,
            created.entity.kind.as_str(),
            created.entity.id,
            created.position
        );
        Ok(created)
    }

    /// Deletes one note or media row and applies the negative delta.
    ///
    /// Module and account deletes are rejected with `InvalidRequest`.
    pub fn delete(&self, kind: EntityKind, id: Uuid) -> QuotaResult<Deleted> {
        let op = match kind {
            EntityKind::Note => "delete_note",
            EntityKind::Media => "delete_media",
            EntityKind::Module | EntityKind::Account => {
                return Err(QuotaError::InvalidRequest(format!(
                    "{} deletes must cascade",
                    kind.as_str()
                )))
            }
        };
        let deleted = with_retry(&self.retry, op, || match kind {
            EntityKind::Note => self.delete_note_once(id),
            _ => self.delete_media_once(id),
        })?;
        info!(
            "event=mutation_commit module=mutator status=ok op={} {}={} account_id={} bytes_released={}",
            op,
            deleted.entity.kind.as_str(),
            deleted.entity.id,
            deleted.account_id,
            deleted.bytes_released
        );
        Ok(deleted)
    }

    /// Swaps the account's tier pointer. Counters are left untouched.
    pub fn change_tier(&self, account_id: AccountId, tier: &str) -> QuotaResult<()> {
        with_retry(&self.retry, "change_tier", || {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
            if !update_account_tier(&tx, account_id, tier)? {
                return Err(QuotaError::NotFound(EntityRef::account(account_id)));
            }
            tx.commit()?;
            Ok(())
        })?;
        info!(
            "event=mutation_commit module=mutator status=ok op=change_tier account_id={} tier={}",
            account_id, tier
        );
        Ok(())
    }

    fn create_once(&self, request: &CreateRequest) -> QuotaResult<Created> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let created = match request {
            CreateRequest::Account { tier } => {
                let account_id = Uuid::new_v4();
                insert_account(&tx, account_id, tier)?;
                Created {
                    entity: EntityRef::account(account_id),
                    position: 0,
                }
            }
            CreateRequest::Module { account_id } => {
                create_module_in_tx(&tx, *account_id, self.guard)?
            }
            CreateRequest::Note {
                account_id,
                module_id,
            } => create_note_in_tx(&tx, *account_id, *module_id, self.guard)?,
            CreateRequest::Media {
                account_id,
                note_id,
                media,
            } => create_media_in_tx(&tx, *account_id, *note_id, media, self.guard)?,
        };
        tx.commit()?;
        Ok(created)
    }

    fn delete_note_once(&self, note_id: NoteId) -> QuotaResult<Deleted> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let note =
            load_note(&tx, note_id)?.ok_or(QuotaError::NotFound(EntityRef::note(note_id)))?;
        let bytes = note.media_bytes();

        delete_note_row(&tx, note.id)?;
        compact_note_positions(&tx, note.module_id, note.position)?;
        apply_module_delta(&tx, note.module_id, -1)?;
        apply_account_delta(
            &tx,
            note.account_id,
            AccountDelta {
                notes: -1,
                storage_bytes: -signed(bytes)?,
                ..AccountDelta::default()
            },
        )?;
        tx.commit()?;

        Ok(Deleted {
            entity: EntityRef::note(note.id),
            account_id: note.account_id,
            bytes_released: bytes,
            released_paths: note
                .media_files
                .into_iter()
                .map(|media| media.storage_path)
                .collect(),
        })
    }

    fn delete_media_once(&self, media_id: MediaId) -> QuotaResult<Deleted> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let note_id =
            media_owner(&tx, media_id)?.ok_or(QuotaError::NotFound(EntityRef::media(media_id)))?;
        let note =
            load_note(&tx, note_id)?.ok_or(QuotaError::NotFound(EntityRef::media(media_id)))?;
        let media = note
            .media_files
            .iter()
            .find(|media| media.id == media_id)
            .cloned()
            .ok_or(QuotaError::NotFound(EntityRef::media(media_id)))?;
        let position = media_position(&tx, media_id)?;

        delete_media_row(&tx, media_id)?;
        compact_media_positions(&tx, note.id, position)?;
        apply_account_delta(
            &tx,
            note.account_id,
            AccountDelta {
                storage_bytes: -signed(media.size_bytes)?,
                ..AccountDelta::default()
            },
        )?;
        tx.commit()?;

        Ok(Deleted {
            entity: EntityRef::media(media_id),
            account_id: note.account_id,
            bytes_released: media.size_bytes,
            released_paths: vec![media.storage_path],
        })
    }
}

fn create_module_in_tx(
    tx: &Transaction<'_>,
    account_id: AccountId,
    guard: AdmissionGuard<'_>,
) -> QuotaResult<Created> {
    let account = load_account(tx, account_id)?
        .ok_or(QuotaError::NotFound(EntityRef::account(account_id)))?;
    if let AdmissionGuard::Enforce { tiers, .. } = guard {
        evaluate_module(&account, tiers.limits_for(&account.tier)).into_result(account_id)?;
    }

    let module_id = Uuid::new_v4();
    let position = account.module_count;
    insert_module(tx, module_id, account_id, position)?;
    apply_account_delta(
        tx,
        account_id,
        AccountDelta {
            modules: 1,
            ..AccountDelta::default()
        },
    )?;
    Ok(Created {
        entity: EntityRef::module(module_id),
        position,
    })
}

fn create_note_in_tx(
    tx: &Transaction<'_>,
    account_id: AccountId,
    module_id: ModuleId,
    guard: AdmissionGuard<'_>,
) -> QuotaResult<Created> {
    let account = load_account(tx, account_id)?
        .ok_or(QuotaError::NotFound(EntityRef::account(account_id)))?;
    let module =
        load_module(tx, module_id)?.ok_or(QuotaError::NotFound(EntityRef::module(module_id)))?;
    ensure_owner(account_id, &module)?;
    if let AdmissionGuard::Enforce { tiers, .. } = guard {
        evaluate_note(&module, tiers.limits_for(&account.tier)).into_result(account_id)?;
    }

    let note_id = Uuid::new_v4();
    let position = module.note_count;
    insert_note(tx, note_id, module_id, account_id, position)?;
    apply_module_delta(tx, module_id, 1)?;
    apply_account_delta(
        tx,
        account_id,
        AccountDelta {
            notes: 1,
            ..AccountDelta::default()
        },
    )?;
    Ok(Created {
        entity: EntityRef::note(note_id),
        position,
    })
}

fn create_media_in_tx(
    tx: &Transaction<'_>,
    account_id: AccountId,
    note_id: NoteId,
    media: &NewMedia,
    guard: AdmissionGuard<'_>,
) -> QuotaResult<Created> {
    let note = load_note(tx, note_id)?.ok_or(QuotaError::NotFound(EntityRef::note(note_id)))?;
    if note.account_id != account_id {
        return Err(QuotaError::Unauthorized {
            account_id,
            module_id: note.module_id,
        });
    }
    let account = load_account(tx, account_id)?
        .ok_or(QuotaError::NotFound(EntityRef::account(account_id)))?;
    if let AdmissionGuard::Enforce {
        tiers,
        file_size_ceiling_bytes,
    } = guard
    {
        evaluate_upload(
            &account,
            tiers.limits_for(&account.tier),
            media.size_bytes,
            file_size_ceiling_bytes,
        )
        .into_result(account_id)?;
    }

    let position = note.media_files.len() as u64;
    insert_media(
        tx,
        &NewMediaRow {
            media_id: media.id,
            note_id,
            account_id,
            position,
            storage_path: &media.storage_path,
            size_bytes: media.size_bytes,
            mime_type: &media.mime_type,
        },
    )?;
    apply_account_delta(
        tx,
        account_id,
        AccountDelta {
            storage_bytes: signed(media.size_bytes)?,
            ..AccountDelta::default()
        },
    )?;
    Ok(Created {
        entity: EntityRef::media(media.id),
        position,
    })
}

pub(crate) fn signed(bytes: u64) -> QuotaResult<i64> {
    i64::try_from(bytes)
        .map_err(|_| QuotaError::InvalidRequest(format!("size {bytes} exceeds ledger range")))
}
