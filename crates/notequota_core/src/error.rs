//! Engine-level error taxonomy.
//!
//! # Responsibility
//! - Expose the caller-visible rejection kinds (`NotFound`, `Unauthorized`,
//!   `QuotaExceeded`, `Throttled`, `Conflict`) with enough context to act.
//! - Wrap transport failures from SQLite and the object store.
//!
//! # Invariants
//! - Only `Conflict` is retryable; every other rejection is terminal.
//! - Quota and throttle rejections always carry the current value and limit.
//! - `StorageInconsistency` is not an error variant: it only appears inside
//!   a reconciliation report.

use crate::db::DbError;
use crate::model::ledger::{AccountId, EntityRef, ModuleId};
use crate::model::tier::Limit;
use crate::repo::ledger_repo::RepoError;
use crate::storage::StorageError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type QuotaResult<T> = Result<T, QuotaError>;

/// Counter an admission check guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaResource {
    Modules,
    NotesPerModule,
    StorageBytes,
    /// Per-file ceiling that applies regardless of tier.
    FileSize,
}

impl QuotaResource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Modules => "modules",
            Self::NotesPerModule => "notes_per_module",
            Self::StorageBytes => "storage_bytes",
            Self::FileSize => "file_size",
        }
    }
}

#[derive(Debug)]
pub enum QuotaError {
    /// Entity does not exist.
    NotFound(EntityRef),
    /// Module is owned by another account than the caller's.
    Unauthorized {
        account_id: AccountId,
        module_id: ModuleId,
    },
    /// Admission check failed. `requested` is the size of the attempted
    /// addition (1 for counts, byte size for uploads).
    QuotaExceeded {
        resource: QuotaResource,
        current: u64,
        requested: u64,
        max: Limit,
    },
    /// Rate limit hit for `key`.
    Throttled {
        key: String,
        current: u64,
        max: u64,
        retry_after_ms: u64,
    },
    /// Store write conflicts persisted through every retry.
    Conflict { attempts: u32 },
    /// Media type rejected by the pass/fail check.
    UnsupportedMediaType(String),
    /// Caller input that no operation accepts (unknown tier, wrong entity
    /// kind for the operation).
    InvalidRequest(String),
    Db(DbError),
    Storage(StorageError),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl QuotaError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Stable snake_case code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Throttled { .. } => "throttled",
            Self::Conflict { .. } => "conflict",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Db(_) => "db_error",
            Self::Storage(_) => "storage_error",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

impl Display for QuotaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::Unauthorized {
                account_id,
                module_id,
            } => write!(
                f,
                "module {module_id} does not belong to account {account_id}"
            ),
            Self::QuotaExceeded {
                resource,
                current,
                requested,
                max,
            } => write!(
                f,
                "quota exceeded for {}: current={current} requested={requested} max={max}",
                resource.as_str()
            ),
            Self::Throttled {
                key,
                current,
                max,
                retry_after_ms,
            } => write!(
                f,
                "rate limit exceeded for `{key}`: current={current} max={max}; retry after {retry_after_ms} ms"
            ),
            Self::Conflict { attempts } => {
                write!(f, "write conflict persisted after {attempts} attempts")
            }
            Self::UnsupportedMediaType(mime) => write!(f, "unsupported media type `{mime}`"),
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted ledger data: {message}"),
        }
    }
}

impl Error for QuotaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for QuotaError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for QuotaError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for QuotaError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Db(err) => Self::Db(err),
            other => Self::InvalidData(other.to_string()),
        }
    }
}

impl From<StorageError> for QuotaError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}
