// batchlink client facade
// Builds operations, runs them through the configured link chain and hands
// the caller a handle per call:
// - query / mutation resolve once through a CallHandle
// - subscription drives callbacks until closed

use batchlink_core::codec::{HeaderSource, Headers};
use batchlink_core::{
    create_chain, share, ChainError, LinkResult, Operation, OperationId, OperationKind, OperationParams, SharedLink,
};
use batchlink_transport::SharedFetch;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handle::{CallHandle, SubscriptionCallbacks, SubscriptionHandle};
use crate::links::{BatchLinkOptions, HttpBatchLink, HttpLink, LoggerLink, SplitLink};
use crate::path::PathBuilder;
use crate::reactive::MaybeReactive;
use crate::resolve::{RequestHook, RequestResolver, ResponseHook};

/// Client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Prefix for every request path, e.g. `http://localhost:8080`
    pub base_url: String,
    /// Default headers of every operation. Per-call headers win.
    pub headers: MaybeReactive<Headers>,
    /// Headers resolved per request from the path and method. Applied
    /// before operation headers.
    pub header_source: HeaderSource,
    pub on_request: Option<Arc<dyn RequestHook>>,
    pub on_response: Option<Arc<dyn ResponseHook>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            headers: MaybeReactive::default(),
            header_source: HeaderSource::default(),
            on_request: None,
            on_response: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("header_source", &self.header_source)
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}

struct ClientInner {
    config: ClientConfig,
    links: Vec<SharedLink>,
    next_id: AtomicU64,
}

/// Entry point for issuing calls. Cheap to clone; clones share the link
/// chain and the operation id counter.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client running every operation through `links`
    pub fn new(config: ClientConfig, links: Vec<SharedLink>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                links,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// One transport call per operation
    pub fn direct(config: ClientConfig, fetch: SharedFetch) -> Self {
        let http = HttpLink::new(fetch, RequestResolver::new(&config));
        Self::new(config, vec![Arc::new(LoggerLink), Arc::new(http)])
    }

    /// Queries and mutations issued in the same turn share one request to
    /// the batch endpoint; subscriptions and blob uploads go direct
    pub fn batched(config: ClientConfig, fetch: SharedFetch, options: BatchLinkOptions) -> Self {
        let resolver = RequestResolver::new(&config);
        let batch = HttpBatchLink::new(fetch.clone(), resolver.clone(), options);
        let http = HttpLink::new(fetch, resolver);
        let split = SplitLink::batching(vec![Arc::new(batch)], vec![Arc::new(http)]);
        Self::new(config, vec![Arc::new(LoggerLink), Arc::new(split)])
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Assign the next id and apply the default headers underneath the
    /// call's own headers
    pub fn operation(&self, kind: OperationKind, mut params: OperationParams) -> Operation {
        let id = OperationId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let mut headers = self.inner.config.headers.get();
        headers.merge(&params.headers);
        params.headers = headers;
        Operation::new(id, kind, params)
    }

    /// Run `op` through the link chain. The returned observable is shared:
    /// concurrent subscribers observe one execution.
    pub fn execute(&self, op: Operation) -> LinkResult {
        debug!(op = %op.id, kind = %op.kind, path = %op.params.path, "executing operation");
        Ok(create_chain(&self.inner.links, op)?.pipe(share()))
    }

    pub fn query(&self, params: OperationParams) -> Result<CallHandle, ChainError> {
        self.call(OperationKind::Query, params)
    }

    pub fn mutation(&self, params: OperationParams) -> Result<CallHandle, ChainError> {
        self.call(OperationKind::Mutation, params)
    }

    pub fn subscription(
        &self,
        params: OperationParams,
        callbacks: SubscriptionCallbacks,
    ) -> Result<SubscriptionHandle, ChainError> {
        let (op, token) = self.prepare(OperationKind::Subscription, params);
        let id = op.id;
        let subscription = self.execute(op)?.subscribe(callbacks);
        Ok(SubscriptionHandle::new(id, token, subscription))
    }

    /// Start a path, e.g. `client.at("users").at("42").get()`
    pub fn at(&self, segment: impl AsRef<str>) -> PathBuilder {
        PathBuilder::new(self.clone()).at(segment)
    }

    fn call(&self, kind: OperationKind, params: OperationParams) -> Result<CallHandle, ChainError> {
        let (op, token) = self.prepare(kind, params);
        let id = op.id;
        let observable = self.execute(op)?;
        Ok(CallHandle::start(id, token, observable))
    }

    fn prepare(&self, kind: OperationKind, mut params: OperationParams) -> (Operation, CancellationToken) {
        let token = params.cancel.get_or_insert_with(CancellationToken::new).clone();
        (self.operation(kind, params), token)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("links", &self.inner.links.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlink_core::codec::ResponseData;
    use batchlink_core::{link_fn, Observable, Response, ResultEnvelope};
    use serde_json::json;
    use tokio::sync::watch;

    /// Terminal link answering with the operation's headers and id.
    fn echo() -> SharedLink {
        link_fn(|op, _next| {
            let headers: serde_json::Map<String, serde_json::Value> = op
                .params
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect();
            let body = json!({ "id": op.id.as_u64(), "kind": op.kind, "headers": headers });
            Ok(Observable::of(ResultEnvelope::Data(Response::ok(ResponseData::Json(body)))))
        })
    }

    #[tokio::test]
    async fn test_ids_increase_from_one() {
        let client = Client::new(ClientConfig::default(), vec![echo()]);
        let first = client.query(OperationParams::get("/a")).unwrap().await.unwrap();
        let second = client.mutation(OperationParams::post("/a")).unwrap().await.unwrap();

        assert_eq!(first.json().unwrap()["id"], 1);
        assert_eq!(first.json().unwrap()["kind"], "query");
        assert_eq!(second.json().unwrap()["id"], 2);
        assert_eq!(second.json().unwrap()["kind"], "mutation");
    }

    #[tokio::test]
    async fn test_default_headers_are_read_per_call() {
        let (tx, rx) = watch::channel(Headers::new().with("authorization", "Bearer one"));
        let config = ClientConfig {
            headers: MaybeReactive::Reactive(rx),
            ..Default::default()
        };
        let client = Client::new(config, vec![echo()]);

        let outcome = client.query(OperationParams::get("/a")).unwrap().await.unwrap();
        assert_eq!(outcome.json().unwrap()["headers"]["authorization"], "Bearer one");

        tx.send(Headers::new().with("authorization", "Bearer two").with("x-tenant", "t1"))
            .unwrap();
        let outcome = client
            .query(OperationParams::get("/a").header("x-tenant", "t2"))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(outcome.json().unwrap()["headers"]["authorization"], "Bearer two");
        assert_eq!(outcome.json().unwrap()["headers"]["x-tenant"], "t2");
    }

    #[test]
    fn test_empty_chain_is_exhausted() {
        let client = Client::new(ClientConfig::default(), Vec::new());
        let err = client.query(OperationParams::get("/a")).unwrap_err();
        assert_eq!(err, ChainError::Exhausted { index: 0 });
    }
}
