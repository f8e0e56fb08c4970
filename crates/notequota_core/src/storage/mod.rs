//! Object storage boundary for media files.
//!
//! # Responsibility
//! - Define the `ObjectStore` contract used by uploads, cascade cleanup and
//!   the orphan reconciler.
//! - Provide in-memory and filesystem implementations.
//!
//! # Invariants
//! - Object paths are relative, `/`-separated and never contain `..`.
//! - `list(prefix)` returns every object whose path starts with `prefix`,
//!   sorted by path.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    InvalidPath(String),
    /// Backend refused the operation (remote outage, injected failure).
    Unavailable(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "object storage io error at `{}`: {source}", path.display())
            }
            Self::InvalidPath(path) => write!(f, "invalid object path `{path}`"),
            Self::Unavailable(message) => write!(f, "object storage unavailable: {message}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::InvalidPath(_) | Self::Unavailable(_) => None,
        }
    }
}

/// One physical object as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub path: String,
    pub size_bytes: u64,
    /// Last write time in epoch milliseconds.
    pub modified_at_ms: u64,
}

/// Physical object storage shared by all workers.
pub trait ObjectStore: Send + Sync {
    /// Writes (or replaces) one object.
    fn put(&self, path: &str, data: &[u8]) -> StorageResult<()>;
    /// Returns the object size, or `None` when absent.
    fn stat(&self, path: &str) -> StorageResult<Option<u64>>;
    /// Deletes one object. Returns `false` when it was already absent.
    fn delete(&self, path: &str) -> StorageResult<bool>;
    /// Lists objects under `prefix`, sorted by path.
    fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>>;
}

/// Rejects paths that could escape the store root.
pub fn validate_object_path(path: &str) -> StorageResult<()> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.ends_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}
