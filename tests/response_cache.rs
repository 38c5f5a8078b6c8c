use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{
        HeaderValue, Method, Request, StatusCode,
        header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, COOKIE, VARY},
    },
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use pagecache::{
    cache::{
        CACHE_STATUS_HEADER, CacheConfig, CacheListing, CacheState, CacheStore, PURGE_KEY_HEADER,
        StatusPatterns, clock::ManualClock,
    },
    infra::http::with_response_cache,
};
use tempfile::TempDir;
use tower::ServiceExt;

const PURGE_KEY: &str = "s3cret";

struct Harness {
    _dir: TempDir,
    app: Router,
    store: CacheStore,
    clock: Arc<ManualClock>,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(configure: impl FnOnce(&mut CacheConfig)) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut config = CacheConfig {
            directory: dir.path().join("pages"),
            ttl: Duration::from_secs(60),
            response_codes: StatusPatterns::parse(["200"]).expect("valid patterns"),
            ..Default::default()
        };
        config.purge.key = Some(PURGE_KEY.to_string());
        config.bypass.path_prefixes = vec!["/wp-admin".to_string()];
        configure(&mut config);

        let clock = Arc::new(ManualClock::new(1_000));
        let store = CacheStore::open_with_clock(&config.directory, config.ttl, clock.clone())
            .expect("store opens");

        let calls = Arc::new(AtomicUsize::new(0));
        let upstream = Router::new()
            .fallback(fake_origin)
            .with_state(Arc::clone(&calls));
        let app = with_response_cache(upstream, CacheState::new(config, store.clone()));

        Self {
            _dir: dir,
            app,
            store,
            clock,
            calls,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Background purge work is not awaited by the endpoint.
    async fn wait_until(&self, done: impl Fn(&CacheStore) -> bool) {
        for _ in 0..100 {
            if done(&self.store) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background cache work did not finish");
    }
}

/// Streams `<p>{path}</p>` then a footer, labelled gzip or zstd when the client accepts it.
async fn fake_origin(State(calls): State<Arc<AtomicUsize>>, request: Request<Body>) -> Response {
    calls.fetch_add(1, Ordering::SeqCst);

    let path = request.uri().path().to_string();
    let accepted = request
        .headers()
        .get(ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let chunks = vec![
        Ok::<_, std::io::Error>(Bytes::from(format!("<p>{path}</p>"))),
        Ok(Bytes::from_static(b"<footer/>")),
    ];
    let mut response = Response::new(Body::from_stream(futures::stream::iter(chunks)));
    if path.starts_with("/missing") {
        *response.status_mut() = StatusCode::NOT_FOUND;
    }
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    if accepted.contains("gzip") {
        response
            .headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    } else if accepted.contains("zstd") {
        response
            .headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
    }
    response
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

fn purge_request(method: Method, uri: &str, key: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(PURGE_KEY_HEADER, key)
        .body(Body::empty())
        .expect("request should build")
}

fn cache_status(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(CACHE_STATUS_HEADER)
        .and_then(|value| value.to_str().ok())
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

#[tokio::test]
async fn miss_then_hit_serves_identical_body() {
    let harness = Harness::new();

    let first = harness.send(get("/posts/hello/")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_status(&first), Some("MISS"));
    assert_eq!(body_text(first).await, "<p>/posts/hello/</p><footer/>");

    let second = harness.send(get("/posts/hello/")).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(cache_status(&second), Some("HIT"));
    assert_eq!(second.headers()[CONTENT_TYPE], "text/html; charset=UTF-8");
    assert_eq!(second.headers()[VARY], "Accept-Encoding");
    assert!(second.headers().get(CONTENT_ENCODING).is_none());
    assert_eq!(body_text(second).await, "<p>/posts/hello/</p><footer/>");

    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn encodings_are_cached_separately() {
    let harness = Harness::new();

    let gzip_request = || {
        Request::builder()
            .uri("/about/")
            .header(ACCEPT_ENCODING, "gzip, deflate")
            .body(Body::empty())
            .expect("request should build")
    };

    let first = harness.send(gzip_request()).await;
    assert_eq!(cache_status(&first), Some("MISS"));
    body_text(first).await;

    let hit = harness.send(gzip_request()).await;
    assert_eq!(cache_status(&hit), Some("HIT"));
    assert_eq!(hit.headers()[CONTENT_ENCODING], "gzip");
    body_text(hit).await;

    let identity = harness.send(get("/about/")).await;
    assert_eq!(cache_status(&identity), Some("MISS"));
    body_text(identity).await;

    assert_eq!(harness.calls(), 2);
    assert_eq!(
        harness.store.list().mem,
        vec!["gzip::+about+".to_string(), "none::+about+".to_string()]
    );
}

#[tokio::test]
async fn logged_in_visitors_bypass_the_cache() {
    let harness = Harness::new();
    harness.send(get("/posts/hello/")).await.into_body().collect().await.ok();

    for _ in 0..2 {
        let request = Request::builder()
            .uri("/posts/hello/")
            .header(COOKIE, "theme=dark; wordpress_logged_in_1a2b=admin")
            .body(Body::empty())
            .expect("request should build");
        let response = harness.send(request).await;
        assert_eq!(cache_status(&response), None);
        body_text(response).await;
    }

    assert_eq!(harness.calls(), 3);
}

#[tokio::test]
async fn static_assets_and_configured_prefixes_bypass_the_cache() {
    let harness = Harness::new();

    for uri in ["/style.css", "/style.css", "/wp-admin/", "/wp-admin/"] {
        let response = harness.send(get(uri)).await;
        assert_eq!(cache_status(&response), None, "{uri}");
        body_text(response).await;
    }

    assert_eq!(harness.calls(), 4);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn non_get_requests_go_to_origin() {
    let harness = Harness::new();

    for _ in 0..2 {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/contact/")
            .body(Body::from("name=x"))
            .expect("request should build");
        let response = harness.send(request).await;
        assert_eq!(cache_status(&response), None);
        body_text(response).await;
    }

    assert_eq!(harness.calls(), 2);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn uncacheable_statuses_are_forwarded_but_not_stored() {
    let harness = Harness::new();

    for _ in 0..2 {
        let response = harness.send(get("/missing/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(cache_status(&response), Some("MISS"));
        assert_eq!(body_text(response).await, "<p>/missing/</p><footer/>");
    }

    assert_eq!(harness.calls(), 2);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    let harness = Harness::new();
    body_text(harness.send(get("/news/")).await).await;

    harness.clock.advance(60);
    let still_fresh = harness.send(get("/news/")).await;
    assert_eq!(cache_status(&still_fresh), Some("HIT"));
    body_text(still_fresh).await;

    harness.clock.advance(1);
    let expired = harness.send(get("/news/")).await;
    assert_eq!(cache_status(&expired), Some("MISS"));
    body_text(expired).await;

    let refreshed = harness.send(get("/news/")).await;
    assert_eq!(cache_status(&refreshed), Some("HIT"));
    body_text(refreshed).await;

    assert_eq!(harness.calls(), 2);
}

#[tokio::test]
async fn purge_endpoint_lists_keys() {
    let harness = Harness::new();
    body_text(harness.send(get("/posts/hello/")).await).await;

    let response = harness
        .send(purge_request(Method::GET, "/__cache/purge", PURGE_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    let listing: serde_json::Value = serde_json::from_slice(&bytes).expect("json listing");
    assert_eq!(listing["mem"], serde_json::json!(["none::+posts+hello+"]));
    assert_eq!(listing["disk"], serde_json::json!(["none::+posts+hello+"]));
}

#[tokio::test]
async fn purge_endpoint_evicts_one_path() {
    let harness = Harness::new();
    body_text(harness.send(get("/posts/hello/")).await).await;
    body_text(harness.send(get("/posts/other/")).await).await;

    let response = harness
        .send(purge_request(
            Method::POST,
            "/__cache/purge/posts/hello/",
            PURGE_KEY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");

    harness.wait_until(|store| store.len() == 1).await;
    assert_eq!(
        harness.store.list(),
        CacheListing {
            mem: vec!["none::+posts+other+".to_string()],
            disk: vec!["none::+posts+other+".to_string()],
        }
    );

    let again = harness.send(get("/posts/hello/")).await;
    assert_eq!(cache_status(&again), Some("MISS"));
    body_text(again).await;
}

#[tokio::test]
async fn purge_endpoint_flushes_everything() {
    let harness = Harness::new();
    body_text(harness.send(get("/a/")).await).await;
    body_text(harness.send(get("/b/")).await).await;

    let response = harness
        .send(purge_request(Method::POST, "/__cache/purge/", PURGE_KEY))
        .await;
    assert_eq!(body_text(response).await, "OK");

    harness
        .wait_until(|store| store.is_empty() && store.list().disk.is_empty())
        .await;
}

#[tokio::test]
async fn wrong_purge_key_falls_through_to_origin() {
    let harness = Harness::new();
    body_text(harness.send(get("/a/")).await).await;

    let response = harness
        .send(purge_request(Method::POST, "/__cache/purge", "guess"))
        .await;
    assert_eq!(cache_status(&response), None);
    body_text(response).await;

    assert_eq!(harness.calls(), 2);
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test]
async fn purge_endpoint_is_disabled_without_a_key() {
    let harness = Harness::with_config(|config| config.purge.key = None);

    let response = harness
        .send(purge_request(Method::GET, "/__cache/purge", ""))
        .await;
    assert_eq!(cache_status(&response), Some("MISS"));
    assert_eq!(body_text(response).await, "<p>/__cache/purge</p><footer/>");
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn unsupported_origin_encoding_is_never_served_as_identity() {
    let harness = Harness::new();
    let zstd = || {
        Request::builder()
            .uri("/post/")
            .header(ACCEPT_ENCODING, "zstd")
            .body(Body::empty())
            .expect("request should build")
    };

    let first = harness.send(zstd()).await;
    assert_eq!(first.headers()[CACHE_STATUS_HEADER], "MISS");
    assert_eq!(first.headers()[CONTENT_ENCODING], "zstd");
    first.into_body().collect().await.expect("body");
    assert!(harness.store.list().mem.is_empty());

    let plain = harness.send(get("/post/")).await;
    assert_eq!(plain.headers()[CACHE_STATUS_HEADER], "MISS");
    assert!(plain.headers().get(CONTENT_ENCODING).is_none());
    plain.into_body().collect().await.expect("body");
    assert_eq!(harness.calls(), 2);
}
