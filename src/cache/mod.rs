//! Page cache
//!
//! A read-through response cache for a content-management origin:
//!
//! - **Store**: in-memory index of response bodies keyed by
//!   `<encoding>::<path>`, mirrored to one directory per key on disk so the
//!   index survives restarts. Entries expire by age only.
//! - **Capture**: records cacheable origin responses chunk by chunk while
//!   streaming them to the client.
//! - **Middleware**: bypass rules, hit serving, and the purge endpoint.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! directory = "/var/cache/pagecache"
//! ttl_seconds = 300
//! response_codes = ["200", "3XX"]
//!
//! [purge]
//! path = "/__cache/purge"
//! key = "change-me"
//! ```

pub mod capture;
pub mod clock;
mod config;
mod disk;
mod entry;
mod error;
pub mod keys;
mod lock;
mod middleware;
pub mod purge;
pub mod status;
mod store;

pub use capture::{CACHE_STATUS_HEADER, ResponseCapture};
pub use config::{BypassConfig, CacheConfig, PurgeConfig};
pub(crate) use config::{DEFAULT_CACHE_DIR, DEFAULT_LOGGED_IN_COOKIE, DEFAULT_PURGE_PATH, DEFAULT_TTL_SECS};
pub use error::CacheError;
pub use keys::{CacheKey, Encoding};
pub use middleware::{CacheState, response_cache_layer};
pub use purge::{PURGE_KEY_HEADER, PurgeAction};
pub use status::{StatusPattern, StatusPatterns};
pub use store::{CacheListing, CacheStore};
