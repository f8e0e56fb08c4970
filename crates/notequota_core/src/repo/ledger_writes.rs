//! Row writes and counter deltas applied inside ledger transactions.
//!
//! # Responsibility
//! - Keep SQL for entity writes and counter arithmetic in one place.
//! - Compact sibling positions after a delete.
//!
//! # Invariants
//! - Callers hold an open IMMEDIATE transaction; nothing here commits.
//! - Counter columns are only changed by signed deltas, except for the
//!   audited repair path (`overwrite_*`).
//! - A delta that would drive a counter below zero is rejected by the
//!   schema's CHECK constraint and aborts the surrounding transaction.

use crate::model::ledger::{AccountId, MediaId, ModuleId, NoteId};
use crate::repo::ledger_repo::{from_db_int, to_db_int, RepoResult};
use rusqlite::{params, Connection};

/// Signed change to one account's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountDelta {
    pub modules: i64,
    pub notes: i64,
    pub storage_bytes: i64,
}

impl AccountDelta {
    pub fn is_zero(&self) -> bool {
        self.modules == 0 && self.notes == 0 && self.storage_bytes == 0
    }
}

pub(crate) fn insert_account(conn: &Connection, account_id: AccountId, tier: &str) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO accounts (id, tier, module_count, note_count, storage_used_bytes)
         VALUES (?1, ?2, 0, 0, 0);",
        params![account_id.to_string(), tier],
    )?;
    Ok(())
}

pub(crate) fn update_account_tier(
    conn: &Connection,
    account_id: AccountId,
    tier: &str,
) -> RepoResult<bool> {
    let changed = conn.execute(
        "UPDATE accounts
         SET tier = ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1;",
        params![account_id.to_string(), tier],
    )?;
    Ok(changed > 0)
}

pub(crate) fn delete_account_row(conn: &Connection, account_id: AccountId) -> RepoResult<bool> {
    let changed = conn.execute(
        "DELETE FROM accounts WHERE id = ?1;",
        [account_id.to_string()],
    )?;
    Ok(changed > 0)
}

pub(crate) fn apply_account_delta(
    conn: &Connection,
    account_id: AccountId,
    delta: AccountDelta,
) -> RepoResult<bool> {
    if delta.is_zero() {
        return Ok(true);
    }
    let changed = conn.execute(
        "UPDATE accounts
         SET module_count = module_count + ?2,
             note_count = note_count + ?3,
             storage_used_bytes = storage_used_bytes + ?4,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1;",
        params![
            account_id.to_string(),
            delta.modules,
            delta.notes,
            delta.storage_bytes
        ],
    )?;
    Ok(changed > 0)
}

pub(crate) fn apply_module_delta(
    conn: &Connection,
    module_id: ModuleId,
    notes: i64,
) -> RepoResult<bool> {
    let changed = conn.execute(
        "UPDATE modules
         SET note_count = note_count + ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1;",
        params![module_id.to_string(), notes],
    )?;
    Ok(changed > 0)
}

pub(crate) fn insert_module(
    conn: &Connection,
    module_id: ModuleId,
    account_id: AccountId,
    position: u64,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO modules (id, account_id, note_count, position)
         VALUES (?1, ?2, 0, ?3);",
        params![
            module_id.to_string(),
            account_id.to_string(),
            to_db_int(position, "modules.position")?
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_module_row(conn: &Connection, module_id: ModuleId) -> RepoResult<bool> {
    let changed = conn.execute("DELETE FROM modules WHERE id = ?1;", [module_id.to_string()])?;
    Ok(changed > 0)
}

/// Shifts every module after `removed_position` one slot left.
pub(crate) fn compact_module_positions(
    conn: &Connection,
    account_id: AccountId,
    removed_position: u64,
) -> RepoResult<()> {
    conn.execute(
        "UPDATE modules
         SET position = position - 1
         WHERE account_id = ?1
           AND position > ?2;",
        params![
            account_id.to_string(),
            to_db_int(removed_position, "modules.position")?
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_note(
    conn: &Connection,
    note_id: NoteId,
    module_id: ModuleId,
    account_id: AccountId,
    position: u64,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO notes (id, module_id, account_id, position)
         VALUES (?1, ?2, ?3, ?4);",
        params![
            note_id.to_string(),
            module_id.to_string(),
            account_id.to_string(),
            to_db_int(position, "notes.position")?
        ],
    )?;
    Ok(())
}

/// Deletes one note row; its media rows follow via `ON DELETE CASCADE`.
pub(crate) fn delete_note_row(conn: &Connection, note_id: NoteId) -> RepoResult<bool> {
    let changed = conn.execute("DELETE FROM notes WHERE id = ?1;", [note_id.to_string()])?;
    Ok(changed > 0)
}

/// Deletes the given notes of one module and returns how many rows went away.
pub(crate) fn delete_notes_of_module(
    conn: &Connection,
    module_id: ModuleId,
    note_ids: &[NoteId],
) -> RepoResult<usize> {
    let mut stmt = conn.prepare_cached("DELETE FROM notes WHERE id = ?1 AND module_id = ?2;")?;
    let module = module_id.to_string();
    let mut deleted = 0;
    for note_id in note_ids {
        deleted += stmt.execute(params![note_id.to_string(), module.as_str()])?;
    }
    Ok(deleted)
}

pub(crate) fn count_module_notes(conn: &Connection, module_id: ModuleId) -> RepoResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notes WHERE module_id = ?1;",
        [module_id.to_string()],
        |row| row.get(0),
    )?;
    from_db_int(count, "notes.count")
}

/// Sums media bytes held by the notes of one module.
pub(crate) fn module_media_bytes(conn: &Connection, module_id: ModuleId) -> RepoResult<u64> {
    let bytes: i64 = conn.query_row(
        "SELECT COALESCE(SUM(m.size_bytes), 0)
         FROM media_files m
         INNER JOIN notes n ON n.id = m.note_id
         WHERE n.module_id = ?1;",
        [module_id.to_string()],
        |row| row.get(0),
    )?;
    from_db_int(bytes, "media_files.size_bytes")
}

/// Deletes every note and module row of one account. Media rows follow
/// their notes. Returns `(modules, notes)` removed.
pub(crate) fn delete_account_children(
    conn: &Connection,
    account_id: AccountId,
) -> RepoResult<(usize, usize)> {
    let account = account_id.to_string();
    let notes = conn.execute("DELETE FROM notes WHERE account_id = ?1;", [account.as_str()])?;
    let modules = conn.execute(
        "DELETE FROM modules WHERE account_id = ?1;",
        [account.as_str()],
    )?;
    Ok((modules, notes))
}

pub(crate) fn compact_note_positions(
    conn: &Connection,
    module_id: ModuleId,
    removed_position: u64,
) -> RepoResult<()> {
    conn.execute(
        "UPDATE notes
         SET position = position - 1
         WHERE module_id = ?1
           AND position > ?2;",
        params![
            module_id.to_string(),
            to_db_int(removed_position, "notes.position")?
        ],
    )?;
    Ok(())
}

/// Fields of one media row to insert.
pub(crate) struct NewMediaRow<'a> {
    pub media_id: MediaId,
    pub note_id: NoteId,
    pub account_id: AccountId,
    pub position: u64,
    pub storage_path: &'a str,
    pub size_bytes: u64,
    pub mime_type: &'a str,
}

pub(crate) fn insert_media(conn: &Connection, row: &NewMediaRow<'_>) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO media_files (
            id,
            note_id,
            account_id,
            position,
            storage_path,
            size_bytes,
            mime_type
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        params![
            row.media_id.to_string(),
            row.note_id.to_string(),
            row.account_id.to_string(),
            to_db_int(row.position, "media_files.position")?,
            row.storage_path,
            to_db_int(row.size_bytes, "media_files.size_bytes")?,
            row.mime_type,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_media_row(conn: &Connection, media_id: MediaId) -> RepoResult<bool> {
    let changed = conn.execute(
        "DELETE FROM media_files WHERE id = ?1;",
        [media_id.to_string()],
    )?;
    Ok(changed > 0)
}

pub(crate) fn compact_media_positions(
    conn: &Connection,
    note_id: NoteId,
    removed_position: u64,
) -> RepoResult<()> {
    conn.execute(
        "UPDATE media_files
         SET position = position - 1
         WHERE note_id = ?1
           AND position > ?2;",
        params![
            note_id.to_string(),
            to_db_int(removed_position, "media_files.position")?
        ],
    )?;
    Ok(())
}

/// Returns the `position` of one media row within its note.
pub(crate) fn media_position(conn: &Connection, media_id: MediaId) -> RepoResult<u64> {
    let position: i64 = conn.query_row(
        "SELECT position FROM media_files WHERE id = ?1;",
        [media_id.to_string()],
        |row| row.get(0),
    )?;
    from_db_int(position, "media_files.position")
}

/// Overwrites account counters. Only the audited repair path may call this.
pub(crate) fn overwrite_account_counters(
    conn: &Connection,
    account_id: AccountId,
    module_count: u64,
    note_count: u64,
    storage_used_bytes: u64,
) -> RepoResult<bool> {
    let changed = conn.execute(
        "UPDATE accounts
         SET module_count = ?2,
             note_count = ?3,
             storage_used_bytes = ?4,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1;",
        params![
            account_id.to_string(),
            to_db_int(module_count, "accounts.module_count")?,
            to_db_int(note_count, "accounts.note_count")?,
            to_db_int(storage_used_bytes, "accounts.storage_used_bytes")?,
        ],
    )?;
    Ok(changed > 0)
}

/// Overwrites one module's note counter. Only the audited repair path may
/// call this.
pub(crate) fn overwrite_module_note_count(
    conn: &Connection,
    module_id: ModuleId,
    note_count: u64,
) -> RepoResult<bool> {
    let changed = conn.execute(
        "UPDATE modules
         SET note_count = ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1;",
        params![
            module_id.to_string(),
            to_db_int(note_count, "modules.note_count")?
        ],
    )?;
    Ok(changed > 0)
}
