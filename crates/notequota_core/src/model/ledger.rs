//! Ledger read models.
//!
//! # Responsibility
//! - Describe accounts, modules, notes and embedded media references.
//! - Own the storage path layout used by uploads and the reconciler.
//!
//! # Invariants
//! - `position` is the zero-based index among siblings and stays dense:
//!   deletes compact later siblings, so `currentCount` is always free.
//! - A media object path always starts with its account's storage prefix.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type AccountId = Uuid;
pub type ModuleId = Uuid;
pub type NoteId = Uuid;
pub type MediaId = Uuid;

/// Account ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    /// Tier name as persisted. May be unknown to the running policy table.
    pub tier: String,
    pub module_count: u64,
    pub note_count: u64,
    pub storage_used_bytes: u64,
}

/// Module ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: ModuleId,
    pub account_id: AccountId,
    pub note_count: u64,
    pub position: u64,
}

/// Note row with its ordered media references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub module_id: ModuleId,
    pub account_id: AccountId,
    pub position: u64,
    pub media_files: Vec<MediaRef>,
}

impl Note {
    /// Total bytes charged to the account for this note.
    pub fn media_bytes(&self) -> u64 {
        self.media_files.iter().map(|media| media.size_bytes).sum()
    }
}

/// Media reference embedded in a note. The named object is owned by the note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub id: MediaId,
    pub storage_path: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Ledger entity kinds addressed by the mutator and error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Module,
    Note,
    Media,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Module => "module",
            Self::Note => "note",
            Self::Media => "media",
        }
    }
}

/// Typed pointer to one ledger entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn account(id: AccountId) -> Self {
        Self {
            kind: EntityKind::Account,
            id,
        }
    }

    pub fn module(id: ModuleId) -> Self {
        Self {
            kind: EntityKind::Module,
            id,
        }
    }

    pub fn note(id: NoteId) -> Self {
        Self {
            kind: EntityKind::Note,
            id,
        }
    }

    pub fn media(id: MediaId) -> Self {
        Self {
            kind: EntityKind::Media,
            id,
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.id)
    }
}

/// Returns the object-store prefix that holds every object of one account.
///
/// The trailing `/` keeps `accounts/<a>` from matching `accounts/<a>x`.
pub fn account_storage_prefix(root: &str, account_id: AccountId) -> String {
    format!("{}/{account_id}/", root.trim_end_matches('/'))
}

/// Returns the object path for one media file.
pub fn media_storage_path(
    root: &str,
    account_id: AccountId,
    note_id: NoteId,
    media_id: MediaId,
) -> String {
    format!(
        "{}notes/{note_id}/{media_id}",
        account_storage_prefix(root, account_id)
    )
}
