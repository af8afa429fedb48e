use batchlink_core::codec::{decode_response, ResponseData};
use batchlink_core::{
    LinkError, LinkResult, Next, Observable, Operation, OperationKind, OperationLink, Response, ResultEnvelope,
    Subscriber, Teardown,
};
use batchlink_transport::{HttpResponse, SharedFetch};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::resolve::RequestResolver;

/// Terminal link issuing one transport call per operation.
///
/// Cancelling the operation's token or unsubscribing aborts the call.
/// Subscription operations read the response body as newline-delimited JSON
/// events.
#[derive(Clone)]
pub struct HttpLink {
    fetch: SharedFetch,
    resolver: Arc<RequestResolver>,
}

impl HttpLink {
    pub fn new(fetch: SharedFetch, resolver: RequestResolver) -> Self {
        HttpLink {
            fetch,
            resolver: Arc::new(resolver),
        }
    }
}

impl OperationLink for HttpLink {
    fn run(&self, op: Operation, _next: Next<'_>) -> LinkResult {
        let fetch = self.fetch.clone();
        let resolver = self.resolver.clone();
        Ok(Observable::new(move |subscriber| {
            let token = token_of(&op);
            let op = op.clone();
            let fetch = fetch.clone();
            let resolver = resolver.clone();
            let task = tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(op = %op.id, "operation cancelled");
                        subscriber.error(LinkError::Cancelled);
                    }
                    _ = perform(&fetch, &resolver, &op, &subscriber) => {}
                }
            });
            Teardown::new(move || task.abort())
        }))
    }
}

async fn perform(
    fetch: &SharedFetch,
    resolver: &RequestResolver,
    op: &Operation,
    subscriber: &Subscriber<ResultEnvelope, LinkError>,
) {
    let request = match resolver.resolve(op).await {
        Ok(request) => request,
        Err(err) => return subscriber.error(err),
    };
    debug!(op = %op.id, kind = %op.kind, method = %request.method, url = %request.url, "sending operation");

    let response = match fetch.fetch(request).await {
        Ok(response) => response,
        Err(err) => return subscriber.error(err.into()),
    };

    if op.kind == OperationKind::Subscription && response.is_success() {
        stream_events(response, resolver, op, subscriber).await;
        return;
    }

    match read_response(response).await {
        Ok(response) => {
            resolver.after_response(op, &response).await;
            deliver(response, subscriber);
        }
        Err(err) => subscriber.error(err),
    }
}

async fn read_response(response: HttpResponse) -> Result<Response, LinkError> {
    let status = response.status;
    let headers = response.headers.clone();
    let content_type = response.content_type().map(str::to_string);
    let body = response.bytes().await?;
    let data = decode_response(content_type.as_deref(), &body)?;
    Ok(Response { status, headers, data })
}

/// Emits a one-shot response: data on 2xx, a transport error otherwise.
pub(crate) fn deliver(response: Response, subscriber: &Subscriber<ResultEnvelope, LinkError>) {
    if response.is_success() {
        subscriber.next(ResultEnvelope::Data(response));
        subscriber.complete();
    } else {
        let body = match response.data {
            ResponseData::Empty => None,
            data => Some(data.to_json()),
        };
        subscriber.error(LinkError::status(response.status, body));
    }
}

async fn stream_events(
    response: HttpResponse,
    resolver: &RequestResolver,
    op: &Operation,
    subscriber: &Subscriber<ResultEnvelope, LinkError>,
) {
    let status = response.status;
    let headers = response.headers.clone();
    subscriber.next(ResultEnvelope::Started);

    let mut events = response.events();
    while let Some(event) = events.next().await {
        if subscriber.is_closed() {
            return;
        }
        match event {
            Ok(value) => {
                let response = Response {
                    status,
                    headers: headers.clone(),
                    data: ResponseData::Json(value),
                };
                resolver.after_response(op, &response).await;
                subscriber.next(ResultEnvelope::Data(response));
            }
            Err(err) => {
                warn!(op = %op.id, error = %err, "subscription stream failed");
                return subscriber.error(LinkError::decode(err.to_string()));
            }
        }
    }

    subscriber.next(ResultEnvelope::Stopped);
    subscriber.complete();
}

/// Token of `op`, or a fresh one that nothing else cancels.
pub(crate) fn token_of(op: &Operation) -> CancellationToken {
    op.params.cancel.clone().unwrap_or_default()
}
