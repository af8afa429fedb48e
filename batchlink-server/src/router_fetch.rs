use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Uri},
    Router,
};
use batchlink_core::codec::Headers;
use batchlink_transport::{Fetch, HttpRequest, HttpResponse, TransportError};
use futures::{StreamExt, TryStreamExt};
use std::io;
use tower::ServiceExt;
use tracing::debug;

/// Drives an `axum::Router` in process. Scheme and authority of the request
/// URL are ignored; only path and query reach the router.
#[derive(Clone)]
pub struct RouterFetch {
    router: Router,
}

impl RouterFetch {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Fetch for RouterFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let uri: Uri = request
            .url
            .parse()
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.url, e)))?;
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        debug!(method = %request.method, target = %target, "dispatching in process");

        let body = request.body.map(Body::from).unwrap_or_else(Body::empty);
        let mut http_request = Request::builder()
            .method(request.method)
            .uri(target)
            .body(body)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        *http_request.headers_mut() = request.headers.to_header_map();

        let response = match self.router.clone().oneshot(http_request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        let status = response.status().as_u16();
        let headers = Headers::from(response.headers());
        let body = response
            .into_body()
            .into_data_stream()
            .map_err(io::Error::other)
            .boxed();
        Ok(HttpResponse::new(status, headers, body))
    }
}

impl std::fmt::Debug for RouterFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterFetch").finish_non_exhaustive()
    }
}
