//! Filesystem-backed object store.
//!
//! Objects map 1:1 onto files below `base_dir`. Writes go to a temp file in
//! the target directory and are renamed into place, so a crashed upload
//! never leaves a truncated object under its final path.

use super::{validate_object_path, ObjectEntry, ObjectStore, StorageError, StorageResult};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use uuid::Uuid;

const TMP_FILE_PREFIX: &str = ".tmp-";

#[derive(Debug)]
pub struct FsObjectStore {
    base_dir: PathBuf,
}

impl FsObjectStore {
    /// Creates the store, creating `base_dir` when missing.
    pub fn new(base_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|source| io_error(&base_dir, source))?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        self.base_dir.as_path()
    }

    fn object_path(&self, path: &str) -> StorageResult<PathBuf> {
        validate_object_path(path)?;
        Ok(path
            .split('/')
            .fold(self.base_dir.clone(), |acc, segment| acc.join(segment)))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let target = self.object_path(path)?;
        let dir = target
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;

        let tmp_path = dir.join(format!("{TMP_FILE_PREFIX}{}", Uuid::new_v4()));
        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &target)
        })();

        if let Err(source) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_error(&target, source));
        }
        Ok(())
    }

    fn stat(&self, path: &str) -> StorageResult<Option<u64>> {
        let target = self.object_path(path)?;
        match fs::metadata(&target) {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(&target, source)),
        }
    }

    fn delete(&self, path: &str) -> StorageResult<bool> {
        let target = self.object_path(path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(io_error(&target, source)),
        }
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        // Walk from the deepest directory fully named by the prefix, then
        // filter by the full prefix string.
        let dir_part = match prefix.rfind('/') {
            Some(index) => &prefix[..index],
            None => "",
        };
        let start = dir_part
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.base_dir.clone(), |acc, segment| acc.join(segment));

        let mut entries = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let read_dir = match fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(source) => return Err(io_error(&dir, source)),
            };
            for entry in read_dir {
                let entry = entry.map_err(|source| io_error(&dir, source))?;
                let path = entry.path();
                let file_type = entry.file_type().map_err(|source| io_error(&path, source))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TMP_FILE_PREFIX) {
                    continue;
                }
                let Some(relative) = relative_object_path(&self.base_dir, &path) else {
                    continue;
                };
                if !relative.starts_with(prefix) {
                    continue;
                }
                let metadata = entry.metadata().map_err(|source| io_error(&path, source))?;
                entries.push(ObjectEntry {
                    path: relative,
                    size_bytes: metadata.len(),
                    modified_at_ms: modified_epoch_ms(&metadata),
                });
            }
        }

        entries.sort_by(|left, right| left.path.cmp(&right.path));
        Ok(entries)
    }
}

fn relative_object_path(base_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base_dir).ok()?;
    let segments = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}

// Filesystems without mtime report the epoch, which reads as old.
fn modified_epoch_ms(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}
