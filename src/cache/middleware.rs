//! Response cache middleware.
//!
//! Serves cached pages without touching the origin and wraps origin responses
//! in a [`ResponseCapture`] on a miss. Bypass rules and the purge surface are
//! evaluated before the store is consulted.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderValue, Method, Request,
        header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, COOKIE, VARY},
    },
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use metrics::counter;
use tracing::{debug, instrument};

use super::{
    CacheConfig, CacheStore,
    capture::{CACHE_STATUS_HEADER, ResponseCapture},
    keys::{CacheKey, Encoding},
    purge,
};

const METRIC_HIT_TOTAL: &str = "pagecache_hit_total";
const METRIC_MISS_TOTAL: &str = "pagecache_miss_total";

const HIT_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<CacheConfig>,
    pub store: CacheStore,
}

impl CacheState {
    pub fn new(config: CacheConfig, store: CacheStore) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if cache.config.bypass.skips_path(&path) {
        debug!(reason = "path", "bypassing cache");
        return next.run(request).await;
    }

    if let Some(response) = purge::handle(&cache.config.purge, &cache.store, &request) {
        return response;
    }

    // Logged-in visitors see admin chrome that must never be shared.
    let has_session = request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|cookies| cache.config.bypass.has_session(cookies));
    if has_session {
        debug!(reason = "session", "bypassing cache");
        return next.run(request).await;
    }

    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let encoding = Encoding::negotiate(
        request
            .headers()
            .get_all(ACCEPT_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    );
    let key = CacheKey::new(encoding, path.as_str()).to_string();

    match cache.store.get(&key) {
        Ok(body) => {
            debug!(key = %key, outcome = "hit", "serving cached response");
            counter!(METRIC_HIT_TOTAL).increment(1);
            return hit_response(encoding, body);
        }
        Err(err) => {
            debug!(key = %key, outcome = "miss", reason = %err, "cache miss, running origin");
            counter!(METRIC_MISS_TOTAL).increment(1);
        }
    }

    let response = next.run(request).await;
    ResponseCapture::new(cache.store.clone(), path, cache.config.response_codes.clone())
        .wrap(response)
}

fn hit_response(encoding: Encoding, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(HIT_CONTENT_TYPE));
    headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
    if encoding != Encoding::None {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
    }
    response
}
