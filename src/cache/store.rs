//! Two-tier response store: an in-memory index mirrored to disk.
//!
//! The index is the authority for everything written during this process's
//! lifetime. The disk mirror is best effort: a failed write is logged and
//! counted but never rolls back the in-memory copy.

use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{
    clock::{Clock, SystemClock},
    disk::DiskMirror,
    entry::CacheEntry,
    error::CacheError,
    keys::{normalize, variants},
    lock::{read_index, write_index},
};

const METRIC_EXPIRED_TOTAL: &str = "pagecache_expired_total";
const METRIC_STORE_WRITE_ERROR_TOTAL: &str = "pagecache_store_write_error_total";

/// Snapshot of what the store holds, as served by the purge endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheListing {
    pub mem: Vec<String>,
    pub disk: Vec<String>,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, CacheEntry>,
    /// Keys evicted for age whose directories are still waiting to be removed.
    retired: HashSet<String>,
}

/// Shared cache store. Cheap to clone; clones share the same index.
#[derive(Clone)]
pub struct CacheStore {
    index: Arc<RwLock<Index>>,
    disk: DiskMirror,
    ttl: u64,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Open the store rooted at `root`, rebuilding the index from disk.
    pub fn open(root: impl Into<PathBuf>, ttl: Duration) -> Result<Self, CacheError> {
        Self::open_with_clock(root, ttl, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        root: impl Into<PathBuf>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let disk = DiskMirror::new(root.into());
        disk.ensure_root()
            .map_err(|source| CacheError::StorageWrite {
                path: disk.root().to_path_buf(),
                source,
            })?;

        let now = clock.now_secs();
        let entries: HashMap<String, CacheEntry> = disk
            .load()
            .into_iter()
            .map(|(key, chunks)| (key, CacheEntry::from_chunks(chunks, now)))
            .collect();

        info!(
            root = %disk.root().display(),
            recovered = entries.len(),
            ttl_secs = ttl.as_secs(),
            "cache store opened"
        );

        Ok(Self {
            index: Arc::new(RwLock::new(Index {
                entries,
                retired: HashSet::new(),
            })),
            disk,
            ttl: ttl.as_secs(),
            clock,
        })
    }

    pub fn root(&self) -> &Path {
        self.disk.root()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Fetch the body stored under `key`.
    ///
    /// Resident entries are subject to the ttl. Keys that were never loaded
    /// into memory are read straight from disk without a ttl check and are
    /// not promoted into the index.
    pub fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let key = normalize(key);
        let now = self.clock.now_secs();

        {
            let index = read_index(&self.index, "get");
            match index.entries.get(&key) {
                Some(entry) if !entry.is_expired(now, self.ttl) => {
                    debug!(cache = "memory", key = %key, outcome = "hit", "cache hit");
                    return Ok(entry.body());
                }
                Some(_) => {}
                None if index.retired.contains(&key) => return Err(CacheError::miss(key)),
                None => return self.read_from_disk(&key),
            }
        }

        self.evict_expired(key, now)
    }

    /// Store one chunk of a response body.
    ///
    /// Chunk 0 (re)starts the entry and its ttl window. Only chunk 0 creates
    /// an entry: a later chunk for a key that is not resident (purged, flushed
    /// or expired mid-stream) is dropped in memory and on disk. A disk failure
    /// is returned after the in-memory update has already been applied.
    pub fn set(&self, key: &str, chunk_index: usize, bytes: Bytes) -> Result<(), CacheError> {
        let key = normalize(key);
        let now = self.clock.now_secs();

        let mut index = write_index(&self.index, "set");
        match index.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().write_chunk(chunk_index, bytes.clone(), now);
            }
            Entry::Vacant(slot) if chunk_index == 0 => {
                slot.insert(CacheEntry::new(now))
                    .write_chunk(chunk_index, bytes.clone(), now);
            }
            Entry::Vacant(_) => {
                debug!(key = %key, chunk = chunk_index, "no entry for continuation chunk, skipping");
                return Ok(());
            }
        }
        index.retired.remove(&key);

        debug!(key = %key, chunk = chunk_index, len = bytes.len(), "cache chunk stored");

        if let Err(err) = self.disk.write_chunk(&key, chunk_index, &bytes) {
            error!(key = %key, chunk = chunk_index, error = %err, "error writing to cache");
            counter!(METRIC_STORE_WRITE_ERROR_TOTAL).increment(1);
            return Err(err);
        }
        Ok(())
    }

    /// Remove every encoding variant of a logical path from memory and disk.
    pub fn purge(&self, path: &str) {
        let mut index = write_index(&self.index, "purge");
        for key in variants(path) {
            index.entries.remove(&key);
            index.retired.remove(&key);
            if let Err(err) = self.disk.remove_key(&key) {
                warn!(key = %key, error = %err, "failed to remove purged cache directory");
            }
        }
        debug!(path, "cache purged");
    }

    /// Drop everything. The index is cleared even when disk removal fails.
    pub fn flush(&self) -> Result<(), CacheError> {
        let mut index = write_index(&self.index, "flush");
        index.entries.clear();
        index.retired.clear();

        match self.disk.clear() {
            Ok(()) => {
                info!(root = %self.disk.root().display(), "cache flushed");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "error flushing cache");
                Err(err)
            }
        }
    }

    pub fn list(&self) -> CacheListing {
        let mut mem: Vec<String> = read_index(&self.index, "list")
            .entries
            .keys()
            .cloned()
            .collect();
        mem.sort();

        CacheListing {
            mem,
            disk: self.disk.list(),
        }
    }

    /// Number of entries resident in memory.
    pub fn len(&self) -> usize {
        read_index(&self.index, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_from_disk(&self, key: &str) -> Result<Bytes, CacheError> {
        match self.disk.read_key(key) {
            Ok(body) => {
                debug!(cache = "disk", key = %key, outcome = "hit", "cache hit");
                Ok(body)
            }
            Err(err @ CacheError::Miss { .. }) => Err(err),
            Err(err) => {
                warn!(key = %key, error = %err, "unreadable cache directory treated as miss");
                Err(CacheError::miss(key))
            }
        }
    }

    /// Drop a stale entry unless a concurrent chunk-0 write restamped it.
    fn evict_expired(&self, key: String, now: u64) -> Result<Bytes, CacheError> {
        let mut index = write_index(&self.index, "evict_expired");
        match index.entries.get(&key) {
            Some(entry) if !entry.is_expired(now, self.ttl) => return Ok(entry.body()),
            Some(_) => {}
            None => return Err(CacheError::expired(key)),
        }

        index.entries.remove(&key);
        index.retired.insert(key.clone());
        drop(index);

        debug!(key = %key, "cache expired");
        counter!(METRIC_EXPIRED_TOTAL).increment(1);
        self.schedule_disk_eviction(key.clone());

        Err(CacheError::expired(key))
    }

    fn schedule_disk_eviction(&self, key: String) {
        let index = Arc::clone(&self.index);
        let disk = self.disk.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || evict_retired(&index, &disk, &key));
            }
            Err(_) => evict_retired(&index, &disk, &key),
        }
    }
}

/// Remove a retired key's directory if nothing has re-created the key since.
fn evict_retired(index: &RwLock<Index>, disk: &DiskMirror, key: &str) {
    let mut index = write_index(index, "evict_retired");
    if !index.retired.remove(key) || index.entries.contains_key(key) {
        return;
    }
    if let Err(err) = disk.remove_key(key) {
        warn!(key = %key, error = %err, "failed to remove expired cache directory");
    }
}
