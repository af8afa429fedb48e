//! Turns an [`Operation`] into a transport request: URL, merged headers,
//! encoded body, and the request/response hooks.

use async_trait::async_trait;
use batchlink_core::codec::{encode_body, merge_headers, EncodedBody, HeaderSource, Headers, RequestInit};
use batchlink_core::{LinkError, Operation, Response};
use batchlink_transport::HttpRequest;
use http::Method;
use std::sync::Arc;
use tracing::trace;

use crate::client::ClientConfig;

/// Runs before a request is sent and may rewrite it. Bodies added to GET or
/// HEAD requests here are removed again.
#[async_trait]
pub trait RequestHook: Send + Sync {
    async fn on_request(&self, path: &str, init: &mut RequestInit) -> Result<(), LinkError>;
}

/// Observes every decoded response, including error statuses.
#[async_trait]
pub trait ResponseHook: Send + Sync {
    async fn on_response(&self, op: &Operation, response: &Response);
}

/// Shared request resolution used by both the direct and the batch link.
#[derive(Clone)]
pub struct RequestResolver {
    base_url: String,
    headers: HeaderSource,
    on_request: Option<Arc<dyn RequestHook>>,
    on_response: Option<Arc<dyn ResponseHook>>,
}

impl RequestResolver {
    pub fn new(config: &ClientConfig) -> Self {
        RequestResolver {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: config.header_source.clone(),
            on_request: config.on_request.clone(),
            on_response: config.on_response.clone(),
        }
    }

    pub fn url_for(&self, target: &str) -> String {
        format!("{}{}", self.base_url, target)
    }

    /// Synchronous part of resolution: method, headers and encoded body.
    /// Client-wide header sources apply first, operation headers win.
    pub fn init_for(&self, op: &Operation) -> RequestInit {
        let mut init = RequestInit::new(op.params.method.clone());
        init.body = op.params.body.as_ref().map(encode_body);

        let mut headers = merge_headers(&Headers::new(), &self.headers, &op.params.path, &init);
        headers.merge(&op.params.headers);
        if let Some(body) = &init.body {
            if !headers.contains("content-type") {
                headers.insert("content-type", body.content_type());
            }
        }
        init.headers = headers;
        init.strip_body_if_bodiless();
        init
    }

    /// Full resolution of a single operation, including the request hook.
    pub async fn resolve(&self, op: &Operation) -> Result<HttpRequest, LinkError> {
        let init = self.init_for(op);
        self.finish(&op.params.path, &op.target(), init).await
    }

    /// Resolution of the combined request sent by the batch link.
    pub async fn resolve_batch(
        &self,
        endpoint: &str,
        shared_headers: &Headers,
        body: EncodedBody,
    ) -> Result<HttpRequest, LinkError> {
        let mut init = RequestInit::new(Method::POST);
        init.body = Some(body);
        let mut headers = merge_headers(&Headers::new(), &self.headers, endpoint, &init);
        headers.merge(shared_headers);
        // The multipart boundary is part of the content type and must not be
        // overridden by a configured header.
        if let Some(body) = &init.body {
            headers.insert("content-type", body.content_type());
        }
        init.headers = headers;
        self.finish(endpoint, endpoint, init).await
    }

    async fn finish(&self, path: &str, target: &str, mut init: RequestInit) -> Result<HttpRequest, LinkError> {
        init.strip_body_if_bodiless();
        if let Some(hook) = &self.on_request {
            hook.on_request(path, &mut init).await?;
            init.strip_body_if_bodiless();
        }

        let url = self.url_for(target);
        trace!(method = %init.method, url = %url, headers = init.headers.len(), "resolved request");
        Ok(HttpRequest {
            method: init.method,
            url,
            headers: init.headers,
            body: init.body.map(|body| body.to_bytes()),
        })
    }

    pub async fn after_response(&self, op: &Operation, response: &Response) {
        if let Some(hook) = &self.on_response {
            hook.on_response(op, response).await;
        }
    }
}

impl std::fmt::Debug for RequestResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestResolver")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}
