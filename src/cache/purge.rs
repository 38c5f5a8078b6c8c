//! Purge control surface.
//!
//! Requests under the purge path carrying the shared secret in
//! [`PURGE_KEY_HEADER`] can list the cache (GET) or evict from it (POST).
//! Evictions run in the background; the caller is answered immediately.

use axum::{
    Json,
    body::Body,
    http::{Method, Request},
    response::{IntoResponse, Response},
};
use metrics::counter;
use subtle::ConstantTimeEq;
use tracing::{debug, error, warn};

use super::{config::PurgeConfig, store::CacheStore};

pub const PURGE_KEY_HEADER: &str = "x-purge-key";

const METRIC_PURGE_TOTAL: &str = "pagecache_purge_total";
const METRIC_FLUSH_TOTAL: &str = "pagecache_flush_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeAction {
    List,
    Flush,
    Purge(String),
}

impl PurgeConfig {
    /// Work out what an authenticated request under the purge path asks for.
    ///
    /// The purge path must end at a segment boundary. A POST suffix shorter
    /// than two characters (`""` or `"/"`) flushes everything; anything longer
    /// names the logical path to purge.
    pub fn action(&self, method: &Method, path: &str) -> Option<PurgeAction> {
        let suffix = path
            .strip_prefix(self.path.as_str())
            .filter(|suffix| suffix.is_empty() || suffix.starts_with('/'))?;
        match *method {
            Method::GET => Some(PurgeAction::List),
            Method::POST if suffix.len() < 2 => Some(PurgeAction::Flush),
            Method::POST => Some(PurgeAction::Purge(suffix.to_string())),
            _ => None,
        }
    }

    /// Constant-time comparison of the presented key with the configured one.
    pub fn authorizes(&self, presented: Option<&str>) -> bool {
        match (self.key.as_deref(), presented) {
            (Some(expected), Some(presented)) => {
                bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
            }
            _ => false,
        }
    }
}

/// Answer a purge-surface request, or `None` when the request is not one.
///
/// Requests with a wrong or missing key are logged and handed back to the
/// normal caching path.
pub(super) fn handle(
    config: &PurgeConfig,
    store: &CacheStore,
    request: &Request<Body>,
) -> Option<Response> {
    if config.key.is_none() {
        return None;
    }
    let path = request.uri().path();
    let action = config.action(request.method(), path)?;

    let presented = request
        .headers()
        .get(PURGE_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if !config.authorizes(presented) {
        warn!(path, method = %request.method(), "purge request with invalid key");
        return None;
    }

    Some(match action {
        PurgeAction::List => Json(store.list()).into_response(),
        PurgeAction::Flush => {
            debug!("cache flush requested");
            spawn_flush(store.clone());
            "OK".into_response()
        }
        PurgeAction::Purge(target) => {
            debug!(path = %target, "cache purge requested");
            spawn_purge(store.clone(), target);
            "OK".into_response()
        }
    })
}

fn spawn_flush(store: CacheStore) {
    counter!(METRIC_FLUSH_TOTAL).increment(1);
    tokio::task::spawn_blocking(move || {
        if let Err(err) = store.flush() {
            error!(error = %err, "background flush failed");
        }
    });
}

fn spawn_purge(store: CacheStore, path: String) {
    counter!(METRIC_PURGE_TOTAL).increment(1);
    tokio::task::spawn_blocking(move || store.purge(&path));
}
