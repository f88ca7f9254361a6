//! The mutable side: ciphered records keyed by content hash.
//!
//! [`OffchainStore`] is what the service needs from a document store.
//! `insert` must check uniqueness and write as one step, and `replace` is
//! keyed by the hash being superseded so that two writers racing from the
//! same old record cannot both succeed.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error};

use crate::error::IdvaultError;
use crate::record::CipheredRecord;

/// Off-chain record operations.
pub trait OffchainStore: Send + Sync {
    /// The record stored under `content_hash`, or `NotFound`.
    fn find_by_hash(&self, content_hash: &str) -> Result<CipheredRecord, IdvaultError>;

    /// Store a new record. Fails with `DuplicateKey` if its hash is taken.
    fn insert(&self, record: CipheredRecord) -> Result<(), IdvaultError>;

    /// Swap the record under `old_hash` for `record`. Fails with `NotFound`
    /// if `old_hash` is absent.
    fn replace(&self, old_hash: &str, record: CipheredRecord) -> Result<(), IdvaultError>;

    /// Up to `limit` records ordered by hash, strictly after `after`.
    fn find_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CipheredRecord>, IdvaultError>;

    /// Every record. Debug and admin use only; prefer [`find_page`](Self::find_page).
    fn find_all(&self) -> Result<Vec<CipheredRecord>, IdvaultError> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.find_page(cursor.as_deref(), 256)?;
            let done = page.len() < 256;
            cursor = page.last().map(|r| r.content_hash.clone());
            out.extend(page);
            if done {
                return Ok(out);
            }
        }
    }
}

type Records = BTreeMap<String, CipheredRecord>;

fn page_of(records: &Records, after: Option<&str>, limit: usize) -> Vec<CipheredRecord> {
    let start = match after {
        Some(hash) => Bound::Excluded(hash.to_string()),
        None => Bound::Unbounded,
    };
    records
        .range((start, Bound::Unbounded))
        .take(limit)
        .map(|(_, r)| r.clone())
        .collect()
}

fn insert_into(records: &mut Records, record: CipheredRecord) -> Result<(), IdvaultError> {
    if records.contains_key(&record.content_hash) {
        return Err(IdvaultError::DuplicateKey(record.content_hash));
    }
    records.insert(record.content_hash.clone(), record);
    Ok(())
}

fn replace_in(
    records: &mut Records,
    old_hash: &str,
    record: CipheredRecord,
) -> Result<(), IdvaultError> {
    if !records.contains_key(old_hash) {
        return Err(IdvaultError::NotFound(old_hash.to_string()));
    }
    if record.content_hash != old_hash && records.contains_key(&record.content_hash) {
        return Err(IdvaultError::DuplicateKey(record.content_hash));
    }
    records.remove(old_hash);
    records.insert(record.content_hash.clone(), record);
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Records held in an ordered map behind a read/write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>, IdvaultError> {
        self.records
            .read()
            .map_err(|_| IdvaultError::Unavailable("record store poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>, IdvaultError> {
        self.records
            .write()
            .map_err(|_| IdvaultError::Unavailable("record store poisoned".into()))
    }

    pub fn len(&self) -> usize {
        self.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OffchainStore for MemoryStore {
    fn find_by_hash(&self, content_hash: &str) -> Result<CipheredRecord, IdvaultError> {
        self.read()?
            .get(content_hash)
            .cloned()
            .ok_or_else(|| IdvaultError::NotFound(content_hash.to_string()))
    }

    fn insert(&self, record: CipheredRecord) -> Result<(), IdvaultError> {
        insert_into(&mut *self.write()?, record)
    }

    fn replace(&self, old_hash: &str, record: CipheredRecord) -> Result<(), IdvaultError> {
        replace_in(&mut *self.write()?, old_hash, record)
    }

    fn find_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CipheredRecord>, IdvaultError> {
        Ok(page_of(&*self.read()?, after, limit))
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Records persisted as a JSON array in a single file.
///
/// Mutations are applied to a copy of the collection, written to a sibling
/// temp file, and renamed over the original while the write lock is held.
/// If persisting fails the in-memory state is left unchanged.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: RwLock<Records>,
}

impl FileStore {
    /// Open `path`, creating an empty collection if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IdvaultError> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| IdvaultError::Storage(e.to_string()))?;
            let list: Vec<CipheredRecord> = if bytes.is_empty() {
                Vec::new()
            } else {
                serde_json::from_slice(&bytes)
                    .map_err(|e| IdvaultError::Storage(format!("{}: {}", path.display(), e)))?
            };
            let mut map = Records::new();
            for record in list {
                insert_into(&mut map, record).map_err(|e| IdvaultError::Storage(e.to_string()))?;
            }
            map
        } else {
            Records::new()
        };
        debug!(path = %path.display(), records = records.len(), "opened record file");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &Records) -> Result<(), IdvaultError> {
        let list: Vec<&CipheredRecord> = records.values().collect();
        let json = serde_json::to_vec_pretty(&list)
            .map_err(|e| IdvaultError::Storage(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            error!(path = %self.path.display(), error = %e, "record file write failed");
            IdvaultError::Unavailable(format!("record file: {}", e))
        })
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut Records) -> Result<(), IdvaultError>,
    ) -> Result<(), IdvaultError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| IdvaultError::Unavailable("record store poisoned".into()))?;
        let mut next = guard.clone();
        apply(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>, IdvaultError> {
        self.records
            .read()
            .map_err(|_| IdvaultError::Unavailable("record store poisoned".into()))
    }
}

impl OffchainStore for FileStore {
    fn find_by_hash(&self, content_hash: &str) -> Result<CipheredRecord, IdvaultError> {
        self.read()?
            .get(content_hash)
            .cloned()
            .ok_or_else(|| IdvaultError::NotFound(content_hash.to_string()))
    }

    fn insert(&self, record: CipheredRecord) -> Result<(), IdvaultError> {
        self.mutate(|records| insert_into(records, record))
    }

    fn replace(&self, old_hash: &str, record: CipheredRecord) -> Result<(), IdvaultError> {
        self.mutate(|records| replace_in(records, old_hash, record))
    }

    fn find_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CipheredRecord>, IdvaultError> {
        Ok(page_of(&*self.read()?, after, limit))
    }
}
