//! Response capture: mirrors a streamed origin response into the store.
//!
//! The response head is inspected once, before any body bytes move. When the
//! status matches a configured pattern, every body chunk is written to the
//! store under the next chunk index and then handed on, unchanged, to the
//! client. Chunks of uncacheable responses pass straight through.

use axum::{
    body::Body,
    http::{HeaderValue, header::CONTENT_ENCODING},
    response::Response,
};
use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, warn};

use super::{
    keys::{CacheKey, Encoding},
    status::StatusPatterns,
    store::CacheStore,
};

/// Diagnostic header telling clients whether the cache answered.
pub const CACHE_STATUS_HEADER: &str = "x-page-cache";

pub struct ResponseCapture {
    store: CacheStore,
    path: String,
    patterns: StatusPatterns,
}

impl ResponseCapture {
    pub fn new(store: CacheStore, path: impl Into<String>, patterns: StatusPatterns) -> Self {
        Self {
            store,
            path: path.into(),
            patterns,
        }
    }

    /// Wrap an origin response so its body is recorded as it streams out.
    pub fn wrap(self, response: Response) -> Response {
        let (mut parts, body) = response.into_parts();
        parts
            .headers
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));

        let status = parts.status.as_u16();
        if !self.patterns.is_cacheable(status) {
            debug!(path = %self.path, status, "status not cacheable, passing through");
            return Response::from_parts(parts, body);
        }

        let content_encoding = parts.headers.get(CONTENT_ENCODING);
        let Some(encoding) = Encoding::from_content_encoding(
            content_encoding.map(|value| value.to_str().unwrap_or("?")),
        ) else {
            debug!(path = %self.path, status, ?content_encoding, "unsupported content-encoding, passing through");
            return Response::from_parts(parts, body);
        };
        let key = CacheKey::new(encoding, self.path).to_string();
        debug!(key = %key, status, "capturing response");

        Response::from_parts(parts, capture_body(self.store, key, body))
    }
}

fn capture_body(store: CacheStore, key: String, body: Body) -> Body {
    let mut chunks = body.into_data_stream();
    let captured = stream! {
        let mut index = 0usize;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    if !bytes.is_empty() {
                        store_chunk(&store, &key, index, bytes.clone()).await;
                        index += 1;
                    }
                    yield Ok::<Bytes, axum::Error>(bytes);
                }
                Err(err) => {
                    warn!(key = %key, chunks = index, error = %err, "origin body failed mid-stream");
                    yield Err(err);
                    break;
                }
            }
        }
    };
    Body::from_stream(captured)
}

/// Hand a chunk to the store off the async workers and wait, keeping order.
async fn store_chunk(store: &CacheStore, key: &str, index: usize, bytes: Bytes) {
    let store = store.clone();
    let key = key.to_string();
    let task = tokio::task::spawn_blocking(move || store.set(&key, index, bytes));

    match task.await {
        // Disk failures are logged by the store and leave the memory copy intact.
        Ok(_) => {}
        Err(err) => warn!(error = %err, chunk = index, "cache write task failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    use super::*;
    use crate::cache::clock::ManualClock;

    fn store() -> (TempDir, CacheStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = CacheStore::open_with_clock(
            dir.path().join("pages"),
            Duration::from_secs(60),
            Arc::new(ManualClock::new(0)),
        )
        .expect("store opens");
        (dir, store)
    }

    fn streamed(status: StatusCode, chunks: &[&'static str]) -> Response {
        let items: Vec<Result<Bytes, std::io::Error>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
            .collect();
        let mut response = Response::new(Body::from_stream(futures::stream::iter(items)));
        *response.status_mut() = status;
        response
    }

    fn patterns(raw: &[&str]) -> StatusPatterns {
        StatusPatterns::parse(raw).expect("valid patterns")
    }

    async fn drain(response: Response) -> Bytes {
        response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes()
    }

    #[tokio::test]
    async fn cacheable_chunks_are_stored_and_forwarded() {
        let (_dir, store) = store();
        let capture = ResponseCapture::new(store.clone(), "/posts/a/", patterns(&["200"]));

        let response = capture.wrap(streamed(StatusCode::OK, &["<h1>", "hello", "</h1>"]));
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "MISS");
        assert_eq!(drain(response).await, Bytes::from_static(b"<h1>hello</h1>"));

        assert_eq!(
            store.get("none::/posts/a/").expect("cached"),
            Bytes::from_static(b"<h1>hello</h1>")
        );
        let chunk_files = std::fs::read_dir(store.root().join("none::+posts+a+"))
            .expect("key directory")
            .count();
        assert_eq!(chunk_files, 3);
    }

    #[tokio::test]
    async fn class_wildcard_caches_no_content_statuses() {
        let (_dir, store) = store();
        let capture = ResponseCapture::new(store.clone(), "/a", patterns(&["200", "2XX"]));

        drain(capture.wrap(streamed(StatusCode::ACCEPTED, &["ok"]))).await;
        assert!(store.get("none::/a").is_ok());
    }

    #[tokio::test]
    async fn uncacheable_status_passes_through() {
        let (_dir, store) = store();
        let capture = ResponseCapture::new(store.clone(), "/moved", patterns(&["200", "2XX"]));

        let response = capture.wrap(streamed(StatusCode::MOVED_PERMANENTLY, &["gone"]));
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "MISS");
        assert_eq!(drain(response).await, Bytes::from_static(b"gone"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn content_encoding_selects_the_variant() {
        let (_dir, store) = store();
        let capture = ResponseCapture::new(store.clone(), "/z", patterns(&["200"]));

        let mut response = streamed(StatusCode::OK, &["compressed"]);
        response
            .headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        drain(capture.wrap(response)).await;

        assert_eq!(store.list().mem, vec!["br::+z".to_string()]);
    }

    #[tokio::test]
    async fn unsupported_content_encoding_is_not_stored() {
        let (_dir, store) = store();
        let capture = ResponseCapture::new(store.clone(), "/post/", patterns(&["200"]));

        let mut response = streamed(StatusCode::OK, &["(\u{b5}/\u{fd}", "frame"]);
        response
            .headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        let response = capture.wrap(response);
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "MISS");
        assert_eq!(response.headers()[CONTENT_ENCODING], "zstd");
        assert_eq!(drain(response).await, Bytes::from("(\u{b5}/\u{fd}frame"));

        assert!(store.is_empty());
        assert!(store.list().disk.is_empty());
        assert!(store.get("none::/post/").is_err());
    }

    #[tokio::test]
    async fn empty_patterns_cache_nothing() {
        let (_dir, store) = store();
        let capture = ResponseCapture::new(store.clone(), "/a", StatusPatterns::default());

        drain(capture.wrap(streamed(StatusCode::OK, &["body"]))).await;
        assert!(store.is_empty());
    }
}
