//! Ledger repository contracts and SQLite read implementation.
//!
//! # Responsibility
//! - Load accounts, modules, notes and media references as read models.
//! - Page through a module's notes for cascade enumeration.
//! - Recount live rows for ledger audits.
//!
//! # Invariants
//! - Reads never mutate state.
//! - Negative or non-UUID persisted values surface as `InvalidData` instead of
//!   being masked.
//! - Notes are always returned in `position ASC, id ASC` order.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::ledger::{Account, AccountId, MediaRef, Module, ModuleId, Note, NoteId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from ledger repository operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "ledger repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid ledger data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::UninitializedConnection { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Keyset page request over one module's notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotePage {
    /// Return notes strictly after this position. `None` starts at the head.
    pub after_position: Option<u64>,
    pub limit: u32,
}

/// Counters recomputed from live rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTotals {
    pub module_count: u64,
    pub note_count: u64,
    pub storage_used_bytes: u64,
    /// Live note count per module, keyed by module id.
    pub notes_per_module: BTreeMap<ModuleId, u64>,
}

/// Read-side repository interface for the ledger.
pub trait LedgerRepository {
    fn get_account(&self, account_id: AccountId) -> RepoResult<Option<Account>>;
    fn get_module(&self, module_id: ModuleId) -> RepoResult<Option<Module>>;
    fn get_note(&self, note_id: NoteId) -> RepoResult<Option<Note>>;
    /// Lists an account's modules by position.
    fn list_modules(&self, account_id: AccountId) -> RepoResult<Vec<Module>>;
    /// Lists one page of a module's notes with their media.
    fn list_notes_page(&self, module_id: ModuleId, page: NotePage) -> RepoResult<Vec<Note>>;
    /// Lists every media reference held by live notes of the account.
    fn list_account_media(&self, account_id: AccountId) -> RepoResult<Vec<MediaRef>>;
    /// Recounts modules, notes and media bytes from live rows.
    fn live_totals(&self, account_id: AccountId) -> RepoResult<LiveTotals>;
}

/// SQLite-backed ledger repository.
#[derive(Clone, Copy)]
pub struct SqliteLedgerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLedgerRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_ledger_connection_ready(conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }
}

impl LedgerRepository for SqliteLedgerRepository<'_> {
    fn get_account(&self, account_id: AccountId) -> RepoResult<Option<Account>> {
        load_account(self.conn, account_id)
    }

    fn get_module(&self, module_id: ModuleId) -> RepoResult<Option<Module>> {
        load_module(self.conn, module_id)
    }

    fn get_note(&self, note_id: NoteId) -> RepoResult<Option<Note>> {
        load_note(self.conn, note_id)
    }

    fn list_modules(&self, account_id: AccountId) -> RepoResult<Vec<Module>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, note_count, position
             FROM modules
             WHERE account_id = ?1
             ORDER BY position ASC, id ASC;",
        )?;
        let mut rows = stmt.query([account_id.to_string()])?;
        let mut modules = Vec::new();
        while let Some(row) = rows.next()? {
            modules.push(parse_module_row(row)?);
        }
        Ok(modules)
    }

    fn list_notes_page(&self, module_id: ModuleId, page: NotePage) -> RepoResult<Vec<Note>> {
        let after = match page.after_position {
            Some(position) => to_db_int(position, "notes.position")?,
            None => -1,
        };
        let mut stmt = self.conn.prepare(
            "SELECT id, module_id, account_id, position
             FROM notes
             WHERE module_id = ?1
               AND position > ?2
             ORDER BY position ASC, id ASC
             LIMIT ?3;",
        )?;
        let mut rows = stmt.query(params![module_id.to_string(), after, i64::from(page.limit)])?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(parse_note_row(row)?);
        }
        for note in &mut notes {
            note.media_files = load_note_media(self.conn, note.id)?;
        }
        Ok(notes)
    }

    fn list_account_media(&self, account_id: AccountId) -> RepoResult<Vec<MediaRef>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.storage_path, m.size_bytes, m.mime_type
             FROM media_files m
             INNER JOIN notes n ON n.id = m.note_id
             WHERE n.account_id = ?1
             ORDER BY m.storage_path ASC;",
        )?;
        let mut rows = stmt.query([account_id.to_string()])?;
        let mut media = Vec::new();
        while let Some(row) = rows.next()? {
            media.push(parse_media_row(row)?);
        }
        Ok(media)
    }

    fn live_totals(&self, account_id: AccountId) -> RepoResult<LiveTotals> {
        live_totals(self.conn, account_id)
    }
}

pub(crate) fn load_account(
    conn: &Connection,
    account_id: AccountId,
) -> RepoResult<Option<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, tier, module_count, note_count, storage_used_bytes
         FROM accounts
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([account_id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_account_row(row)?));
    }
    Ok(None)
}

pub(crate) fn load_module(conn: &Connection, module_id: ModuleId) -> RepoResult<Option<Module>> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id, note_count, position
         FROM modules
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([module_id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_module_row(row)?));
    }
    Ok(None)
}

pub(crate) fn load_note(conn: &Connection, note_id: NoteId) -> RepoResult<Option<Note>> {
    let note = {
        let mut stmt = conn.prepare(
            "SELECT id, module_id, account_id, position
             FROM notes
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([note_id.to_string()])?;
        match rows.next()? {
            Some(row) => parse_note_row(row)?,
            None => return Ok(None),
        }
    };
    Ok(Some(Note {
        media_files: load_note_media(conn, note.id)?,
        ..note
    }))
}

/// Resolves the note that owns one media row.
pub(crate) fn media_owner(conn: &Connection, media_id: Uuid) -> RepoResult<Option<NoteId>> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT note_id FROM media_files WHERE id = ?1;",
            [media_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    owner
        .map(|value| parse_uuid(&value, "media_files.note_id"))
        .transpose()
}

pub(crate) fn live_totals(conn: &Connection, account_id: AccountId) -> RepoResult<LiveTotals> {
    let account = account_id.to_string();
    let module_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM modules WHERE account_id = ?1;",
        [account.as_str()],
        |row| row.get(0),
    )?;
    let note_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notes WHERE account_id = ?1;",
        [account.as_str()],
        |row| row.get(0),
    )?;
    let storage_used_bytes: i64 = conn.query_row(
        "SELECT COALESCE(SUM(m.size_bytes), 0)
         FROM media_files m
         INNER JOIN notes n ON n.id = m.note_id
         WHERE n.account_id = ?1;",
        [account.as_str()],
        |row| row.get(0),
    )?;

    let mut notes_per_module = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT md.id, COUNT(n.id)
         FROM modules md
         LEFT JOIN notes n ON n.module_id = md.id
         WHERE md.account_id = ?1
         GROUP BY md.id;",
    )?;
    let mut rows = stmt.query([account.as_str()])?;
    while let Some(row) = rows.next()? {
        let module_id: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        notes_per_module.insert(
            parse_uuid(&module_id, "modules.id")?,
            from_db_int(count, "notes.count")?,
        );
    }

    Ok(LiveTotals {
        module_count: from_db_int(module_count, "modules.count")?,
        note_count: from_db_int(note_count, "notes.count")?,
        storage_used_bytes: from_db_int(storage_used_bytes, "media_files.size_bytes")?,
        notes_per_module,
    })
}

fn load_note_media(conn: &Connection, note_id: NoteId) -> RepoResult<Vec<MediaRef>> {
    let mut stmt = conn.prepare(
        "SELECT id, storage_path, size_bytes, mime_type
         FROM media_files
         WHERE note_id = ?1
         ORDER BY position ASC, id ASC;",
    )?;
    let mut rows = stmt.query([note_id.to_string()])?;
    let mut media = Vec::new();
    while let Some(row) = rows.next()? {
        media.push(parse_media_row(row)?);
    }
    Ok(media)
}

fn parse_account_row(row: &Row<'_>) -> RepoResult<Account> {
    let id: String = row.get("id")?;
    Ok(Account {
        id: parse_uuid(&id, "accounts.id")?,
        tier: row.get("tier")?,
        module_count: from_db_int(row.get("module_count")?, "accounts.module_count")?,
        note_count: from_db_int(row.get("note_count")?, "accounts.note_count")?,
        storage_used_bytes: from_db_int(
            row.get("storage_used_bytes")?,
            "accounts.storage_used_bytes",
        )?,
    })
}

fn parse_module_row(row: &Row<'_>) -> RepoResult<Module> {
    let id: String = row.get("id")?;
    let account_id: String = row.get("account_id")?;
    Ok(Module {
        id: parse_uuid(&id, "modules.id")?,
        account_id: parse_uuid(&account_id, "modules.account_id")?,
        note_count: from_db_int(row.get("note_count")?, "modules.note_count")?,
        position: from_db_int(row.get("position")?, "modules.position")?,
    })
}

fn parse_note_row(row: &Row<'_>) -> RepoResult<Note> {
    let id: String = row.get("id")?;
    let module_id: String = row.get("module_id")?;
    let account_id: String = row.get("account_id")?;
    Ok(Note {
        id: parse_uuid(&id, "notes.id")?,
        module_id: parse_uuid(&module_id, "notes.module_id")?,
        account_id: parse_uuid(&account_id, "notes.account_id")?,
        position: from_db_int(row.get("position")?, "notes.position")?,
        media_files: Vec::new(),
    })
}

fn parse_media_row(row: &Row<'_>) -> RepoResult<MediaRef> {
    let id: String = row.get("id")?;
    Ok(MediaRef {
        id: parse_uuid(&id, "media_files.id")?,
        storage_path: row.get("storage_path")?,
        size_bytes: from_db_int(row.get("size_bytes")?, "media_files.size_bytes")?,
        mime_type: row.get("mime_type")?,
    })
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn from_db_int(value: i64, column: &'static str) -> RepoResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("negative value `{value}` in {column}")))
}

pub(crate) fn to_db_int(value: u64, column: &'static str) -> RepoResult<i64> {
    i64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("value `{value}` overflows {column}")))
}

fn ensure_ledger_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}
