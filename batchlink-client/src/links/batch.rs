//! Terminal link that coalesces operations into one multipart request to the
//! server's batch endpoint.

use batchlink_core::codec::{EncodedBody, Headers};
use batchlink_core::wire::{decode_batch_response, encode_batch};
use batchlink_core::{
    BatchFetch, BatchItem, BatchKey, BatchLoader, DataLoader, Keyed, LinkError, LinkResult, LoadError, Next,
    Observable, Operation, OperationKind, OperationLink, Response, Teardown, DEFAULT_BATCH_PATH,
};
use batchlink_transport::SharedFetch;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::http::{deliver, token_of};
use crate::resolve::RequestResolver;

#[derive(Debug, Clone)]
pub struct BatchLinkOptions {
    /// Path of the batch endpoint, relative to the base URL.
    pub endpoint: String,
    /// Upper bound on operations per request. `None` means unbounded.
    pub max_items: Option<usize>,
}

impl Default for BatchLinkOptions {
    fn default() -> Self {
        BatchLinkOptions {
            endpoint: DEFAULT_BATCH_PATH.to_string(),
            max_items: None,
        }
    }
}

/// Sends a frozen batch of operations as one transport call.
pub struct OperationLoader {
    fetch: SharedFetch,
    resolver: Arc<RequestResolver>,
    options: BatchLinkOptions,
}

impl BatchLoader for OperationLoader {
    type Item = Operation;
    type Output = Response;
    type Error = LinkError;

    fn validate(&self, pending: &[Operation]) -> bool {
        self.options.max_items.is_none_or(|max| pending.len() <= max)
    }

    fn fetch(&self, batch: Vec<Keyed<Operation>>) -> BatchFetch<Response, LinkError> {
        let token = CancellationToken::new();
        let aborted = token.clone();
        let fetch = self.fetch.clone();
        let resolver = self.resolver.clone();
        let endpoint = self.options.endpoint.clone();

        BatchFetch::new(async move {
            tokio::select! {
                biased;
                _ = aborted.cancelled() => {
                    debug!(endpoint = %endpoint, "batch request aborted");
                    Err(LinkError::Cancelled)
                }
                result = send_batch(&fetch, &resolver, &endpoint, batch) => result,
            }
        })
        .with_cancel(move || token.cancel())
    }
}

async fn send_batch(
    fetch: &SharedFetch,
    resolver: &RequestResolver,
    endpoint: &str,
    batch: Vec<Keyed<Operation>>,
) -> Result<HashMap<BatchKey, Response>, LinkError> {
    let shared = shared_headers(batch.iter().map(|keyed| &keyed.item.params.headers));
    let items: Vec<BatchItem> = batch
        .iter()
        .map(|Keyed { item: op, .. }| BatchItem {
            method: op.params.method.clone(),
            target: op.target(),
            headers: own_headers(&op.params.headers, &shared),
            body: op.params.body.clone(),
        })
        .collect();
    let form = encode_batch(&items);

    let request = resolver
        .resolve_batch(endpoint, &shared, EncodedBody::Multipart(form))
        .await?;
    debug!(size = batch.len(), url = %request.url, "sending batch");

    let response = fetch.fetch(request).await?;
    let status = response.status;
    let headers = response.headers.clone();
    let body = response.bytes().await?;
    if !(200..300).contains(&status) {
        let body = serde_json::from_slice(&body).ok();
        return Err(LinkError::status(status, body));
    }

    let mut entries = decode_batch_response(&body)?;
    let mut results = HashMap::with_capacity(batch.len());
    for (index, keyed) in batch.iter().enumerate() {
        if let Some(entry) = entries.remove(&index) {
            results.insert(
                keyed.key,
                Response {
                    status: entry.status,
                    headers: headers.clone(),
                    data: entry.data(),
                },
            );
        }
    }
    if !entries.is_empty() {
        warn!(extra = ?entries.keys().collect::<Vec<_>>(), "batch response has entries beyond the batch");
    }
    Ok(results)
}

/// Headers every operation carries with the same value.
fn shared_headers<'a>(mut all: impl Iterator<Item = &'a Headers>) -> Headers {
    let Some(first) = all.next() else {
        return Headers::new();
    };
    let mut shared = first.clone();
    for headers in all {
        let differing: Vec<String> = shared
            .iter()
            .filter(|(name, value)| headers.get(name) != Some(*value))
            .map(|(name, _)| name.to_string())
            .collect();
        for name in differing {
            shared.remove(&name);
        }
    }
    shared
}

/// Headers the batch request does not already carry with the same value.
fn own_headers(headers: &Headers, shared: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, value)| shared.get(name) != Some(*value))
        .collect()
}

/// Terminal link batching queries and mutations issued in the same
/// scheduling turn. Results are matched to operations by their position in
/// the request, so every caller receives its own response.
#[derive(Clone)]
pub struct HttpBatchLink {
    loader: DataLoader<OperationLoader>,
    resolver: Arc<RequestResolver>,
}

impl HttpBatchLink {
    pub fn new(fetch: SharedFetch, resolver: RequestResolver, options: BatchLinkOptions) -> Self {
        let resolver = Arc::new(resolver);
        HttpBatchLink {
            loader: DataLoader::new(OperationLoader {
                fetch,
                resolver: resolver.clone(),
                options,
            }),
            resolver,
        }
    }

    /// Operations waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.loader.pending()
    }
}

impl OperationLink for HttpBatchLink {
    fn run(&self, op: Operation, _next: Next<'_>) -> LinkResult {
        if op.kind == OperationKind::Subscription {
            return Ok(Observable::fail(LinkError::protocol(
                "subscriptions cannot be sent through the batch link",
            )));
        }

        let loader = self.loader.clone();
        let resolver = self.resolver.clone();
        Ok(Observable::new(move |subscriber| {
            let token = token_of(&op);
            if token.is_cancelled() {
                subscriber.error(LinkError::Cancelled);
                return Teardown::none();
            }

            let mut load = loader.load(op.clone());
            let canceller = load.canceller();
            let op = op.clone();
            let id = op.id;
            let resolver = resolver.clone();
            let task = tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(op = %id, outcome = ?load.cancel(), "batched operation cancelled");
                        subscriber.error(LinkError::Cancelled);
                    }
                    outcome = &mut load => match outcome {
                        Ok(response) => {
                            resolver.after_response(&op, &response).await;
                            deliver(response, &subscriber);
                        }
                        Err(LoadError::Fetch(err)) => subscriber.error(err),
                        Err(LoadError::Missing(key)) => subscriber.error(LinkError::decode(format!(
                            "batch response has no entry for {} (key {})",
                            id, key
                        ))),
                        Err(LoadError::Cancelled) => subscriber.error(LinkError::Cancelled),
                    },
                }
            });

            Teardown::new(move || {
                canceller.cancel();
                task.abort();
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_headers_keeps_only_equal_values() {
        let a = Headers::new().with("x-tenant", "t1").with("x-trace", "1");
        let b = Headers::new().with("x-tenant", "t1").with("x-trace", "2");
        let c = Headers::new().with("X-Tenant", "t1");

        let shared = shared_headers([&a, &b, &c].into_iter());
        assert_eq!(shared.get("x-tenant"), Some("t1"));
        assert!(!shared.contains("x-trace"));
        assert!(shared_headers(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_own_headers_excludes_shared_values() {
        let shared = Headers::new().with("x-tenant", "t1");
        let headers = Headers::new()
            .with("x-tenant", "t1")
            .with("authorization", "Bearer alice");
        let own = own_headers(&headers, &shared);
        assert_eq!(own.len(), 1);
        assert_eq!(own.get("authorization"), Some("Bearer alice"));
        assert!(own_headers(&shared, &shared).is_empty());
    }

    #[test]
    fn test_default_options() {
        let options = BatchLinkOptions::default();
        assert_eq!(options.endpoint, "/batch");
        assert_eq!(options.max_items, None);
    }
}
