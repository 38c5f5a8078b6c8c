//! HTTP surface: the origin fallback wrapped in the response cache.

mod middleware;
mod origin;

pub use origin::OriginProxy;

use axum::{Router, middleware as axum_middleware};

use crate::cache::{CacheState, response_cache_layer};

use self::middleware::log_responses;

/// Router that answers every request from the cache or the origin.
pub fn build_router(cache: CacheState, origin: OriginProxy) -> Router {
    let upstream = Router::new().fallback(origin::proxy).with_state(origin);
    with_response_cache(upstream, cache)
}

/// Wrap `upstream` in the cache and response logging layers.
///
/// `upstream` stands in for the origin; [`build_router`] passes the proxy.
pub fn with_response_cache(upstream: Router, cache: CacheState) -> Router {
    upstream
        .layer(axum_middleware::from_fn_with_state(
            cache,
            response_cache_layer,
        ))
        .layer(axum_middleware::from_fn(log_responses))
}
