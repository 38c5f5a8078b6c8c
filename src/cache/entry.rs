use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

/// One cached response body, assembled from streamed chunks.
#[derive(Debug, Clone, Default)]
pub(crate) struct CacheEntry {
    chunks: BTreeMap<usize, Bytes>,
    body: BytesMut,
    created_at: u64,
}

impl CacheEntry {
    pub(crate) fn new(created_at: u64) -> Self {
        Self {
            created_at,
            ..Self::default()
        }
    }

    /// Build an entry from chunks recovered off disk.
    pub(crate) fn from_chunks(chunks: BTreeMap<usize, Bytes>, created_at: u64) -> Self {
        let mut entry = Self {
            chunks,
            body: BytesMut::new(),
            created_at,
        };
        entry.rebuild_body();
        entry
    }

    /// Store `bytes` at `index`.
    ///
    /// Index 0 opens a new body: earlier chunks are dropped and the creation
    /// time is restamped. Later indices leave the timestamp alone.
    pub(crate) fn write_chunk(&mut self, index: usize, bytes: Bytes, now: u64) {
        if index == 0 {
            self.chunks.clear();
            self.body.clear();
            self.created_at = now;
        }

        let appends = self
            .chunks
            .last_key_value()
            .is_none_or(|(last, _)| *last < index);
        let replaced = self.chunks.insert(index, bytes.clone()).is_some();

        if appends && !replaced {
            self.body.extend_from_slice(&bytes);
        } else {
            self.rebuild_body();
        }
    }

    pub(crate) fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }

    #[cfg(test)]
    pub(crate) fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Age exceeds `ttl` seconds. An entry stamped in the future is fresh.
    pub(crate) fn is_expired(&self, now: u64, ttl: u64) -> bool {
        now.saturating_sub(self.created_at) > ttl
    }

    #[cfg(test)]
    pub(crate) fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn rebuild_body(&mut self) {
        self.body.clear();
        for chunk in self.chunks.values() {
            self.body.extend_from_slice(chunk);
        }
    }
}
