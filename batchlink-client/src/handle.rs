//! Caller-facing handles returned by the client facade.

use batchlink_core::codec::{Headers, ResponseData};
use batchlink_core::{
    LinkError, Observer, OperationId, OperationObservable, Response, ResultEnvelope, Subscription, TransportFailure,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Settled result of a query or mutation.
///
/// A response outside 200-299, or a call that never reached the server, is
/// reported here with `error` set instead of rejecting the handle.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub data: Option<ResponseData>,
    pub error: Option<TransportFailure>,
    pub status: Option<u16>,
    pub headers: Headers,
}

impl CallOutcome {
    fn from_response(response: Response) -> Self {
        CallOutcome {
            data: Some(response.data),
            error: None,
            status: Some(response.status),
            headers: response.headers,
        }
    }

    fn from_failure(failure: TransportFailure) -> Self {
        CallOutcome {
            data: None,
            status: failure.status,
            error: Some(failure),
            headers: Headers::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        self.data.as_ref().and_then(ResponseData::as_json)
    }
}

type Settle = oneshot::Sender<Result<CallOutcome, LinkError>>;

struct OutcomeObserver {
    tx: Mutex<Option<Settle>>,
}

impl OutcomeObserver {
    fn settle(&self, outcome: Result<CallOutcome, LinkError>) {
        let tx = self.tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }
}

impl Observer<ResultEnvelope, LinkError> for OutcomeObserver {
    fn next(&self, envelope: ResultEnvelope) {
        if let ResultEnvelope::Data(response) = envelope {
            self.settle(Ok(CallOutcome::from_response(response)));
        }
    }

    fn error(&self, err: LinkError) {
        match err {
            LinkError::Transport(failure) => self.settle(Ok(CallOutcome::from_failure(failure))),
            other => self.settle(Err(other)),
        }
    }

    fn complete(&self) {
        self.settle(Err(LinkError::protocol("operation completed without a result")));
    }
}

/// Pending query or mutation.
///
/// The call starts as soon as the handle is created. Awaiting the handle
/// yields the outcome; dropping it does not cancel the call, use
/// [`CallHandle::cancel`] for that.
pub struct CallHandle {
    id: OperationId,
    token: CancellationToken,
    subscription: Subscription,
    outcome: BoxFuture<'static, Result<CallOutcome, LinkError>>,
}

impl CallHandle {
    pub(crate) fn start(id: OperationId, token: CancellationToken, observable: OperationObservable) -> Self {
        let (tx, rx) = oneshot::channel();
        let subscription = observable.subscribe(OutcomeObserver {
            tx: Mutex::new(Some(tx)),
        });

        let cancelled = token.clone();
        let outcome = Box::pin(async move {
            tokio::select! {
                biased;
                settled = rx => settled.unwrap_or(Err(LinkError::Cancelled)),
                _ = cancelled.cancelled() => Err(LinkError::Cancelled),
            }
        });

        CallHandle {
            id,
            token,
            subscription,
            outcome,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Aborts the call. The handle then resolves with
    /// [`LinkError::Cancelled`].
    pub fn cancel(&self) {
        self.subscription.unsubscribe();
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Future for CallHandle {
    type Output = Result<CallOutcome, LinkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.outcome.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;
type Notify = Box<dyn Fn() + Send + Sync>;

/// Callbacks driven by a subscription. Unset callbacks ignore the event.
#[derive(Default)]
pub struct SubscriptionCallbacks {
    started: Option<Notify>,
    data: Option<Callback<Response>>,
    error: Option<Callback<LinkError>>,
    stopped: Option<Notify>,
    complete: Option<Notify>,
}

impl SubscriptionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_started(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.started = Some(Box::new(f));
        self
    }

    pub fn on_data(mut self, f: impl Fn(Response) + Send + Sync + 'static) -> Self {
        self.data = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(LinkError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_stopped(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.stopped = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl Observer<ResultEnvelope, LinkError> for SubscriptionCallbacks {
    fn next(&self, envelope: ResultEnvelope) {
        match envelope {
            ResultEnvelope::Started => {
                if let Some(f) = &self.started {
                    f()
                }
            }
            ResultEnvelope::Data(response) => {
                if let Some(f) = &self.data {
                    f(response)
                }
            }
            ResultEnvelope::Stopped => {
                if let Some(f) = &self.stopped {
                    f()
                }
            }
        }
    }

    fn error(&self, err: LinkError) {
        if let Some(f) = &self.error {
            f(err)
        }
    }

    fn complete(&self) {
        if let Some(f) = &self.complete {
            f()
        }
    }
}

/// Open subscription. Stays open until the server ends the stream, an
/// error occurs, or [`SubscriptionHandle::close`] is called.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: OperationId,
    token: CancellationToken,
    subscription: Subscription,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: OperationId, token: CancellationToken, subscription: Subscription) -> Self {
        SubscriptionHandle {
            id,
            token,
            subscription,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Stops the subscription without invoking any further callbacks.
    pub fn close(&self) {
        self.subscription.unsubscribe();
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchlink_core::{Observable, Teardown};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pending() -> OperationObservable {
        Observable::new(|_subscriber| Teardown::none())
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_outcome() {
        let observable = Observable::fail(LinkError::status(404, Some(json!({"message": "missing"}))));
        let outcome = CallHandle::start(OperationId::new(1), CancellationToken::new(), observable)
            .await
            .unwrap();

        assert!(!outcome.is_ok());
        assert_eq!(outcome.status, Some(404));
        assert!(outcome.data.is_none());
        assert_eq!(outcome.error.unwrap().body, Some(json!({"message": "missing"})));
    }

    #[tokio::test]
    async fn test_protocol_error_rejects() {
        let observable = Observable::fail(LinkError::protocol("bad batch"));
        let result = CallHandle::start(OperationId::new(1), CancellationToken::new(), observable).await;
        assert_eq!(result, Err(LinkError::protocol("bad batch")));
    }

    #[tokio::test]
    async fn test_completion_without_data_rejects() {
        let observable = Observable::new(|subscriber| {
            subscriber.complete();
            Teardown::none()
        });
        let result = CallHandle::start(OperationId::new(1), CancellationToken::new(), observable).await;
        assert!(matches!(result, Err(LinkError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_cancel_resolves_cancelled() {
        let handle = CallHandle::start(OperationId::new(3), CancellationToken::new(), pending());
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.await, Err(LinkError::Cancelled));
    }

    #[test]
    fn test_subscription_callbacks_dispatch() {
        let counts = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)]);
        let (started, data, stopped) = (counts.clone(), counts.clone(), counts.clone());
        let callbacks = SubscriptionCallbacks::new()
            .on_started(move || {
                started[0].fetch_add(1, Ordering::SeqCst);
            })
            .on_data(move |_| {
                data[1].fetch_add(1, Ordering::SeqCst);
            })
            .on_stopped(move || {
                stopped[2].fetch_add(1, Ordering::SeqCst);
            });

        callbacks.next(ResultEnvelope::Started);
        callbacks.next(ResultEnvelope::Data(Response::ok(ResponseData::Empty)));
        callbacks.next(ResultEnvelope::Data(Response::ok(ResponseData::Empty)));
        callbacks.next(ResultEnvelope::Stopped);
        callbacks.complete();

        let seen: Vec<usize> = counts.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(seen, vec![1, 2, 1]);
    }
}
