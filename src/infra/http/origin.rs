//! Streaming reverse proxy to the origin server.

use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        HeaderMap, HeaderName, Request, StatusCode, Uri,
        header::{CONNECTION, HOST},
    },
    response::{IntoResponse, Response},
};
use reqwest::{Client, redirect::Policy};
use tracing::warn;
use url::Url;

use crate::infra::error::InfraError;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
pub struct OriginProxy {
    client: Client,
    base: Url,
}

impl OriginProxy {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Forward `request` to the origin and stream the answer back.
    ///
    /// Transport failures become `502 Bad Gateway`; origin status codes,
    /// including redirects, are relayed untouched.
    pub async fn forward(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let url = self.target(&parts.uri);

        let mut headers = parts.headers;
        let original_host = headers.remove(HOST);
        strip_hop_by_hop(&mut headers);
        if let Some(host) = original_host {
            headers.insert(X_FORWARDED_HOST, host);
        }

        let mut upstream = self
            .client
            .request(parts.method.clone(), url.clone())
            .headers(headers);
        if !body.is_end_stream() {
            upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let reply = match upstream.send().await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    target = "pagecache::http::origin",
                    method = %parts.method,
                    url = %url,
                    error = %err,
                    "origin request failed"
                );
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        };

        let status = reply.status();
        let mut headers = reply.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(reply.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    fn target(&self, uri: &Uri) -> Url {
        let mut url = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{base_path}{}", uri.path()));
        url.set_query(uri.query());
        url
    }
}

/// Router fallback: every request not answered by the cache goes upstream.
pub(super) async fn proxy(State(origin): State<OriginProxy>, request: Request<Body>) -> Response {
    origin.forward(request).await
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are hop-by-hop as well.
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
