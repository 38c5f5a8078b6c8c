//! On-disk mirror of the in-memory index.
//!
//! Layout: `<root>/<storage key>/<chunk index>`. The mirror carries no TTL
//! metadata; it only exists so the index can be rebuilt after a restart.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::error::CacheError;

#[derive(Debug, Clone)]
pub(crate) struct DiskMirror {
    root: PathBuf,
}

impl DiskMirror {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Persist one chunk. Chunk 0 discards whatever the directory held before.
    pub(crate) fn write_chunk(&self, key: &str, index: usize, bytes: &[u8]) -> Result<(), CacheError> {
        let dir = self.key_dir(key);
        if index == 0 {
            remove_dir_if_present(&dir).map_err(|source| CacheError::StorageWrite {
                path: dir.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&dir).map_err(|source| CacheError::StorageWrite {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(index.to_string());
        fs::write(&path, bytes).map_err(|source| CacheError::StorageWrite { path, source })
    }

    /// Concatenate a key's chunks in index order.
    pub(crate) fn read_key(&self, key: &str) -> Result<Bytes, CacheError> {
        let dir = self.key_dir(key);
        let chunks = match read_chunks(&dir) {
            Ok(chunks) => chunks,
            Err(CacheError::StorageRead { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::miss(key));
            }
            Err(err) => return Err(err),
        };
        if chunks.is_empty() {
            return Err(CacheError::miss(key));
        }

        let mut body = BytesMut::new();
        for chunk in chunks.values() {
            body.extend_from_slice(chunk);
        }
        Ok(body.freeze())
    }

    pub(crate) fn remove_key(&self, key: &str) -> io::Result<()> {
        remove_dir_if_present(&self.key_dir(key))
    }

    /// Remove the whole tree and recreate an empty root.
    pub(crate) fn clear(&self) -> Result<(), CacheError> {
        remove_dir_if_present(&self.root).map_err(|source| CacheError::Flush {
            path: self.root.clone(),
            source,
        })?;
        self.ensure_root().map_err(|source| CacheError::Flush {
            path: self.root.clone(),
            source,
        })
    }

    /// Key directories currently present under the root.
    pub(crate) fn list(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        keys.sort();
        keys
    }

    /// Scan every key directory for startup recovery.
    ///
    /// Unreadable or empty directories are skipped; the scan keeps going.
    pub(crate) fn load(&self) -> Vec<(String, BTreeMap<usize, Bytes>)> {
        let mut recovered = Vec::new();
        for key in self.list() {
            match read_chunks(&self.key_dir(&key)) {
                Ok(chunks) if chunks.is_empty() => {
                    debug!(key = %key, "skipping empty cache directory");
                }
                Ok(chunks) => recovered.push((key, chunks)),
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping unreadable cache directory");
                }
            }
        }
        recovered
    }
}

/// Read the numerically named chunk files of one key directory.
fn read_chunks(dir: &Path) -> Result<BTreeMap<usize, Bytes>, CacheError> {
    let entries = fs::read_dir(dir).map_err(|source| CacheError::StorageRead {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut chunks = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| CacheError::StorageRead {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
            continue;
        }
        let Some(index) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<usize>().ok())
        else {
            continue;
        };

        let path = entry.path();
        let bytes = fs::read(&path).map_err(|source| CacheError::StorageRead { path, source })?;
        chunks.insert(index, Bytes::from(bytes));
    }
    Ok(chunks)
}

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
