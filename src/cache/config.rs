//! Cache configuration.
//!
//! Resolved once by [`crate::config::load`] and handed to the store and the
//! middleware at construction; nothing here reads the environment.

use std::{path::PathBuf, time::Duration};

use super::status::StatusPatterns;

pub(crate) const DEFAULT_CACHE_DIR: &str = "cache";
pub(crate) const DEFAULT_TTL_SECS: u64 = 300;
pub(crate) const DEFAULT_PURGE_PATH: &str = "/__cache/purge";
pub(crate) const DEFAULT_LOGGED_IN_COOKIE: &str = "wordpress_logged_in";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root of the on-disk mirror; one subdirectory per cache key.
    pub directory: PathBuf,
    /// Maximum age of an entry, measured from its first chunk.
    pub ttl: Duration,
    /// Statuses whose responses are stored. Empty disables storing.
    pub response_codes: StatusPatterns,
    pub purge: PurgeConfig,
    pub bypass: BypassConfig,
}

#[derive(Debug, Clone)]
pub struct PurgeConfig {
    /// Path prefix of the purge endpoint.
    pub path: String,
    /// Shared secret expected in the purge key header. `None` disables the endpoint.
    pub key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BypassConfig {
    /// Requests under any of these prefixes never touch the cache.
    pub path_prefixes: Vec<String>,
    /// Never cache `/`.
    pub home: bool,
    /// Cookie name fragment marking an authenticated session.
    pub logged_in_cookie: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_CACHE_DIR),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            response_codes: StatusPatterns::default(),
            purge: PurgeConfig::default(),
            bypass: BypassConfig::default(),
        }
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PURGE_PATH.to_string(),
            key: None,
        }
    }
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            path_prefixes: Vec::new(),
            home: false,
            logged_in_cookie: DEFAULT_LOGGED_IN_COOKIE.to_string(),
        }
    }
}

impl BypassConfig {
    /// Path-based bypass: configured prefixes, static assets, and optionally `/`.
    pub fn skips_path(&self, path: &str) -> bool {
        self.path_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
            || is_static_asset(path)
            || (self.home && path == "/")
    }

    /// True when a `Cookie` header value carries the logged-in marker.
    pub fn has_session(&self, cookie_header: &str) -> bool {
        !self.logged_in_cookie.is_empty() && cookie_header.contains(self.logged_in_cookie.as_str())
    }
}

/// A path whose last segment has a file extension (`/wp-content/app.css`).
fn is_static_asset(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rfind('.').map(|dot| dot + 1 < segment.len()))
        .unwrap_or(false)
}
