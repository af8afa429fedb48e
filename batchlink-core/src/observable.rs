//! Minimal push-based observable.
//!
//! An [`Observable`] is cold: nothing happens until [`Observable::subscribe`]
//! runs the producer. The producer receives a [`Subscriber`] and returns a
//! [`Teardown`]. Termination (`error` or `complete`) is idempotent and runs
//! the teardown exactly once, as does [`Subscription::unsubscribe`].
//!
//! Operators are plain functions from one observable to another and are
//! composed with [`Observable::pipe`]. Only the operators the request
//! pipeline needs are provided: [`map`], [`tap`] and [`share`].

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Receives the values, error and completion of an observable.
pub trait Observer<T, E>: Send + Sync {
    fn next(&self, value: T);
    fn error(&self, err: E);
    fn complete(&self);
}

impl<T, E, O> Observer<T, E> for Arc<O>
where
    O: Observer<T, E> + ?Sized,
{
    fn next(&self, value: T) {
        (**self).next(value)
    }

    fn error(&self, err: E) {
        (**self).error(err)
    }

    fn complete(&self) {
        (**self).complete()
    }
}

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn<E> = Box<dyn Fn(E) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Closure-backed observer. Missing callbacks ignore the event.
pub struct ObserverFns<T, E> {
    next: Option<NextFn<T>>,
    error: Option<ErrorFn<E>>,
    complete: Option<CompleteFn>,
}

impl<T, E> ObserverFns<T, E> {
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    pub fn on_next(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(E) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T, E> Default for ObserverFns<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Observer<T, E> for ObserverFns<T, E> {
    fn next(&self, value: T) {
        if let Some(f) = &self.next {
            f(value)
        }
    }

    fn error(&self, err: E) {
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

/// Cleanup returned by a producer.
pub struct Teardown(Option<Box<dyn FnOnce() + Send>>);

impl Teardown {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Teardown(Some(Box::new(f)))
    }

    pub fn none() -> Self {
        Teardown(None)
    }

    fn run(self) {
        if let Some(f) = self.0 {
            f()
        }
    }
}

struct SubscriberInner<T, E> {
    observer: Arc<dyn Observer<T, E>>,
    closed: AtomicBool,
    teardown: Mutex<Option<Teardown>>,
}

impl<T, E> SubscriberInner<T, E> {
    fn run_teardown(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }
}

/// Producer-side handle. Cloneable so producers can move it into tasks.
pub struct Subscriber<T, E> {
    inner: Arc<SubscriberInner<T, E>>,
}

impl<T, E> Clone for Subscriber<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Subscriber<T, E> {
    pub fn next(&self, value: T) {
        if !self.is_closed() {
            self.inner.observer.next(value);
        }
    }

    pub fn error(&self, err: E) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.observer.error(err);
            self.inner.run_teardown();
        }
    }

    pub fn complete(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.observer.complete();
            self.inner.run_teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn set_teardown(&self, teardown: Teardown) {
        *self.inner.teardown.lock() = Some(teardown);
        // The producer may have terminated before it returned its teardown.
        if self.is_closed() {
            self.inner.run_teardown();
        }
    }
}

trait Closable: Send + Sync {
    fn close(&self);
    fn is_closed(&self) -> bool;
}

impl<T, E> Closable for SubscriberInner<T, E> {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.run_teardown();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Returned by [`Observable::subscribe`]. Dropping it does not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<dyn Closable>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

type SubscribeFn<T, E> = dyn Fn(Subscriber<T, E>) -> Teardown + Send + Sync;

pub struct Observable<T, E> {
    subscribe_fn: Arc<SubscribeFn<T, E>>,
}

impl<T, E> Clone for Observable<T, E> {
    fn clone(&self) -> Self {
        Self {
            subscribe_fn: self.subscribe_fn.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for Observable<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Observable")
    }
}

impl<T, E> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new(subscribe_fn: impl Fn(Subscriber<T, E>) -> Teardown + Send + Sync + 'static) -> Self {
        Self {
            subscribe_fn: Arc::new(subscribe_fn),
        }
    }

    /// Emits `value` and completes.
    pub fn of(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::new(move |subscriber| {
            subscriber.next(value.clone());
            subscriber.complete();
            Teardown::none()
        })
    }

    /// Errors immediately.
    pub fn fail(err: E) -> Self
    where
        E: Clone + Sync,
    {
        Self::new(move |subscriber| {
            subscriber.error(err.clone());
            Teardown::none()
        })
    }

    pub fn subscribe(&self, observer: impl Observer<T, E> + 'static) -> Subscription {
        let inner = Arc::new(SubscriberInner {
            observer: Arc::new(observer),
            closed: AtomicBool::new(false),
            teardown: Mutex::new(None),
        });
        let subscriber = Subscriber {
            inner: inner.clone(),
        };
        let teardown = (self.subscribe_fn)(subscriber.clone());
        subscriber.set_teardown(teardown);
        Subscription { inner }
    }

    pub fn pipe<U>(self, operator: impl FnOnce(Self) -> Observable<U, E>) -> Observable<U, E> {
        operator(self)
    }

    /// Subscribes and resolves with the first value, `None` if the observable
    /// completed without one. Dropping the future unsubscribes.
    pub fn first_value(&self) -> FirstValue<T, E> {
        let (tx, rx) = oneshot::channel();
        let subscription = self.subscribe(FirstValueObserver {
            tx: Mutex::new(Some(tx)),
        });
        FirstValue { rx, subscription }
    }
}

struct FirstValueObserver<T, E> {
    tx: Mutex<Option<oneshot::Sender<Result<Option<T>, E>>>>,
}

impl<T: Send, E: Send> FirstValueObserver<T, E> {
    fn settle(&self, outcome: Result<Option<T>, E>) {
        let tx = self.tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }
}

impl<T: Send, E: Send> Observer<T, E> for FirstValueObserver<T, E> {
    fn next(&self, value: T) {
        self.settle(Ok(Some(value)));
    }

    fn error(&self, err: E) {
        self.settle(Err(err));
    }

    fn complete(&self) {
        self.settle(Ok(None));
    }
}

/// Future returned by [`Observable::first_value`].
pub struct FirstValue<T, E> {
    rx: oneshot::Receiver<Result<Option<T>, E>>,
    subscription: Subscription,
}

impl<T, E> FirstValue<T, E> {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl<T, E> Future for FirstValue<T, E> {
    type Output = Result<Option<T>, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped: unsubscribed before any terminal event.
            Poll::Ready(Err(_)) => Poll::Ready(Ok(None)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Drop for FirstValue<T, E> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

struct MapObserver<T, U, E, F> {
    downstream: Subscriber<U, E>,
    project: Arc<F>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, U, E, F> Observer<T, E> for MapObserver<T, U, E, F>
where
    F: Fn(T) -> U + Send + Sync,
    U: Send,
    E: Send,
{
    fn next(&self, value: T) {
        self.downstream.next((self.project)(value));
    }

    fn error(&self, err: E) {
        self.downstream.error(err);
    }

    fn complete(&self) {
        self.downstream.complete();
    }
}

/// Transforms every value; errors and completion pass through untouched.
pub fn map<T, U, E, F>(project: F) -> impl FnOnce(Observable<T, E>) -> Observable<U, E>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    move |source| {
        let project = Arc::new(project);
        Observable::new(move |subscriber| {
            let upstream = source.subscribe(MapObserver {
                downstream: subscriber,
                project: project.clone(),
                _marker: std::marker::PhantomData,
            });
            Teardown::new(move || upstream.unsubscribe())
        })
    }
}

struct TapObserver<T, E> {
    downstream: Subscriber<T, E>,
    tap: Arc<dyn Observer<T, E>>,
}

impl<T, E> Observer<T, E> for TapObserver<T, E>
where
    T: Clone + Send,
    E: Clone + Send,
{
    fn next(&self, value: T) {
        self.tap.next(value.clone());
        self.downstream.next(value);
    }

    fn error(&self, err: E) {
        self.tap.error(err.clone());
        self.downstream.error(err);
    }

    fn complete(&self) {
        self.tap.complete();
        self.downstream.complete();
    }
}

/// Observes events for side effects only.
pub fn tap<T, E>(
    observer: impl Observer<T, E> + 'static,
) -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let tap: Arc<dyn Observer<T, E>> = Arc::new(observer);
    move |source| {
        Observable::new(move |subscriber| {
            let upstream = source.subscribe(TapObserver {
                downstream: subscriber,
                tap: tap.clone(),
            });
            Teardown::new(move || upstream.unsubscribe())
        })
    }
}

struct ShareState<T, E> {
    observers: Vec<(u64, Subscriber<T, E>)>,
    upstream: Option<Subscription>,
    connected: bool,
    generation: u64,
    next_id: u64,
}

impl<T, E> ShareState<T, E> {
    fn disconnect(&mut self) -> Vec<(u64, Subscriber<T, E>)> {
        self.connected = false;
        self.generation += 1;
        self.upstream = None;
        std::mem::take(&mut self.observers)
    }
}

struct ShareObserver<T, E> {
    state: Arc<Mutex<ShareState<T, E>>>,
}

impl<T, E> Observer<T, E> for ShareObserver<T, E>
where
    T: Clone + Send,
    E: Clone + Send,
{
    fn next(&self, value: T) {
        let targets: Vec<Subscriber<T, E>> = self
            .state
            .lock()
            .observers
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect();
        for target in targets {
            target.next(value.clone());
        }
    }

    fn error(&self, err: E) {
        let targets = self.state.lock().disconnect();
        for (_, target) in targets {
            target.error(err.clone());
        }
    }

    fn complete(&self) {
        let targets = self.state.lock().disconnect();
        for (_, target) in targets {
            target.complete();
        }
    }
}

/// Multicasts one upstream subscription to every downstream subscriber.
///
/// Upstream is subscribed when the first downstream subscriber arrives and
/// torn down when the last one leaves. Nothing is replayed to late
/// subscribers. Once upstream terminates, the next subscriber starts a fresh
/// upstream subscription.
pub fn share<T, E>() -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    move |source| {
        let state = Arc::new(Mutex::new(ShareState {
            observers: Vec::new(),
            upstream: None,
            connected: false,
            generation: 0,
            next_id: 0,
        }));

        Observable::new(move |subscriber| {
            let (id, connect) = {
                let mut guard = state.lock();
                let id = guard.next_id;
                guard.next_id += 1;
                guard.observers.push((id, subscriber));
                if guard.connected {
                    (id, None)
                } else {
                    guard.connected = true;
                    (id, Some(guard.generation))
                }
            };

            if let Some(generation) = connect {
                let upstream = source.subscribe(ShareObserver {
                    state: state.clone(),
                });
                let mut guard = state.lock();
                if guard.connected && guard.generation == generation {
                    guard.upstream = Some(upstream);
                } else {
                    drop(guard);
                    upstream.unsubscribe();
                }
            }

            let state = state.clone();
            Teardown::new(move || {
                let upstream = {
                    let mut guard = state.lock();
                    guard.observers.retain(|(other, _)| *other != id);
                    if guard.observers.is_empty() && guard.connected {
                        guard.connected = false;
                        guard.generation += 1;
                        guard.upstream.take()
                    } else {
                        None
                    }
                };
                if let Some(upstream) = upstream {
                    upstream.unsubscribe();
                }
            })
        })
    }
}
