//! Persistent sets of already-accepted unique ids.
//!
//! - **InMemoryStore**: process-lifetime set, for tests and ephemeral consumers
//! - **FileStore**: one line-oriented id log per consumer identity, survives
//!   restarts

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CorrelationError, ErrorCode, Result};

/// A durable set of unique ids.
pub trait IdempotentStore: Send + Sync {
    /// Record `id`. Returns `true` if it was not present before.
    ///
    /// Atomic: two concurrent calls with the same id never both return
    /// `true`.
    fn insert_if_absent(&self, id: &str) -> Result<bool>;

    /// Whether `id` has been recorded.
    fn contains(&self, id: &str) -> Result<bool>;

    /// Number of recorded ids.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['\n', '\r']) {
        return Err(CorrelationError::invalid_unique_id(id));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Id set kept in memory only.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    ids: RwLock<HashSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotentStore for InMemoryStore {
    fn insert_if_absent(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        if self.ids.read().contains(id) {
            return Ok(false);
        }
        Ok(self.ids.write().insert(id.to_string()))
    }

    fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.ids.read().contains(id))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.ids.read().len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct IdLog {
    ids: HashSet<String>,
    file: File,
}

/// Id set persisted as `<dir>/<consumer>.ids`, one id per line.
///
/// The log is read lazily on first use. Every newly accepted id is appended
/// and flushed before `insert_if_absent` returns. If the append fails the id
/// is not retained, so a retry can record it.
///
/// Ids are stored verbatim, whitespace included. A trailing line without its
/// newline is a write torn by a crash; it is truncated away on load.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    log: Mutex<Option<IdLog>>,
}

impl FileStore {
    /// Store for `consumer` under `dir`. Nothing is touched on disk until
    /// first use.
    pub fn new(dir: impl AsRef<Path>, consumer: &str) -> Self {
        let path = dir.as_ref().join(format!("{}.ids", sanitize_consumer(consumer)));
        Self {
            path,
            log: Mutex::new(None),
        }
    }

    /// Path of the id log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut IdLog) -> Result<T>) -> Result<T> {
        let mut guard = self.log.lock();
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        match guard.as_mut() {
            Some(log) => f(log),
            None => Err(CorrelationError::internal("idempotent store log not loaded")),
        }
    }

    fn open(&self) -> Result<IdLog> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CorrelationError::store_io(&self.path, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| CorrelationError::store_io(&self.path, e))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                CorrelationError::new(ErrorCode::StoreCorrupted, "Idempotent store is not valid UTF-8")
                    .with_context("path", self.path.display().to_string())
                    .with_source(e)
            } else {
                CorrelationError::store_io(&self.path, e)
            }
        })?;

        let complete = contents.rfind('\n').map_or(0, |newline| newline + 1);
        if complete < contents.len() {
            warn!(
                path = %self.path.display(),
                fragment = &contents[complete..],
                "Discarding torn trailing line in idempotent store"
            );
            file.set_len(complete as u64)
                .map_err(|e| CorrelationError::store_io(&self.path, e))?;
            contents.truncate(complete);
        }

        let ids: HashSet<String> = contents
            .split_terminator('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        info!(path = %self.path.display(), ids = ids.len(), "Idempotent store loaded");
        Ok(IdLog { ids, file })
    }
}

impl IdempotentStore for FileStore {
    fn insert_if_absent(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        self.with_log(|log| {
            if log.ids.contains(id) {
                return Ok(false);
            }

            let line = format!("{}\n", id);
            log.file
                .write_all(line.as_bytes())
                .and_then(|_| log.file.flush())
                .map_err(|e| CorrelationError::store_io(&self.path, e))?;

            log.ids.insert(id.to_string());
            debug!(path = %self.path.display(), unique_id = id, "Unique id recorded");
            Ok(true)
        })
    }

    fn contains(&self, id: &str) -> Result<bool> {
        self.with_log(|log| Ok(log.ids.contains(id)))
    }

    fn len(&self) -> Result<usize> {
        self.with_log(|log| Ok(log.ids.len()))
    }
}

/// Map a consumer identity to a safe file stem.
fn sanitize_consumer(consumer: &str) -> String {
    consumer
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_insert_if_absent() {
        let store = InMemoryStore::new();
        assert!(store.insert_if_absent("a").unwrap());
        assert!(!store.insert_if_absent("a").unwrap());
        assert!(store.contains("a").unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_rejects_unrecordable_ids() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.insert_if_absent("a\nb").unwrap_err().code(),
            ErrorCode::InvalidUniqueId
        );
        assert!(store.insert_if_absent("").is_err());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_sanitize_consumer() {
        assert_eq!(sanitize_consumer("orders-v2"), "orders-v2");
        assert_eq!(sanitize_consumer("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_consumer("a b:c"), "a_b_c");
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::new(dir.path(), "orders");
        assert!(store.insert_if_absent("m-1").unwrap());
        assert!(store.insert_if_absent("m-2").unwrap());
        assert!(!store.insert_if_absent("m-1").unwrap());
        drop(store);

        let reopened = FileStore::new(dir.path(), "orders");
        assert_eq!(reopened.len().unwrap(), 2);
        assert!(!reopened.insert_if_absent("m-2").unwrap());
        assert!(reopened.insert_if_absent("m-3").unwrap());

        let contents = fs::read_to_string(reopened.path()).unwrap();
        assert_eq!(contents, "m-1\nm-2\nm-3\n");
    }

    #[test]
    fn test_file_store_keeps_surrounding_whitespace() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::new(dir.path(), "orders");
        assert!(store.insert_if_absent("m-1 ").unwrap());
        assert!(store.insert_if_absent("\tm-2").unwrap());
        drop(store);

        let reopened = FileStore::new(dir.path(), "orders");
        assert!(!reopened.insert_if_absent("m-1 ").unwrap());
        assert!(!reopened.insert_if_absent("\tm-2").unwrap());
        assert!(reopened.insert_if_absent("m-1").unwrap());
        assert_eq!(reopened.len().unwrap(), 3);
    }

    #[test]
    fn test_file_store_discards_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.ids");
        fs::write(&path, "m-1\nm-").unwrap();

        let store = FileStore::new(dir.path(), "orders");
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.insert_if_absent("m-2").unwrap());
        drop(store);

        assert_eq!(fs::read_to_string(&path).unwrap(), "m-1\nm-2\n");
        let reopened = FileStore::new(dir.path(), "orders");
        assert!(!reopened.insert_if_absent("m-2").unwrap());
        assert!(!reopened.contains("m-").unwrap());
    }

    #[test]
    fn test_file_store_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"), "orders");
        assert!(!store.path().exists());

        assert!(!store.contains("x").unwrap());
        assert!(store.path().exists());
    }

    #[test]
    fn test_file_store_separates_consumers() {
        let dir = tempfile::tempdir().unwrap();
        let orders = FileStore::new(dir.path(), "orders");
        let billing = FileStore::new(dir.path(), "billing");

        assert!(orders.insert_if_absent("m-1").unwrap());
        assert!(billing.insert_if_absent("m-1").unwrap());
    }
}
