use std::{io, path::PathBuf};

use thiserror::Error;

/// Outcomes of store operations that did not produce a body.
///
/// None of these are fatal to the request path: callers treat `Miss` and
/// `Expired` as "fetch from origin" and only log the storage variants.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("`{key}` is not cached")]
    Miss { key: String },
    #[error("`{key}` is older than the configured ttl")]
    Expired { key: String },
    #[error("failed to persist cache chunk `{}`: {source}", path.display())]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read cache data `{}`: {source}", path.display())]
    StorageRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to flush cache directory `{}`: {source}", path.display())]
    Flush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub(crate) fn miss(key: impl Into<String>) -> Self {
        Self::Miss { key: key.into() }
    }

    pub(crate) fn expired(key: impl Into<String>) -> Self {
        Self::Expired { key: key.into() }
    }

    /// True for outcomes the dispatcher handles by going to the origin.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss { .. } | Self::Expired { .. })
    }
}
