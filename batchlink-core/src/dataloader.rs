//! Batching data-loader.
//!
//! Items passed to [`DataLoader::load`] during one scheduling turn are
//! collected into a pending batch. The first load of a window spawns a flush
//! task; because a spawned task only runs once the issuing task yields, every
//! load issued before that point lands in the same window. At flush time the
//! pending batches are taken as owned snapshots and each is handed to
//! [`BatchLoader::fetch`] exactly once. Results are routed back by the
//! [`BatchKey`] assigned at enqueue time, never by position.
//!
//! On a multi-thread runtime another worker can pick up the flush task while
//! the issuing task is still running. There the flush task yields until no
//! new load arrived during one yield, then freezes the queue. Loads issued
//! back to back still coalesce, but the window is no longer tied to the
//! issuing task's turn.
//!
//! Loads issued while a batch is in flight start a new window; they do not
//! wait for the previous response.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on yields a multi-thread flush waits for the queue to settle.
const MAX_SETTLE_ROUNDS: usize = 16;

/// Correlation key assigned to an item when it is enqueued.
pub type BatchKey = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<T> {
    pub key: BatchKey,
    pub item: T,
}

/// One in-flight batch call: the keyed results plus a way to abort the call.
pub struct BatchFetch<V, E> {
    pub result: BoxFuture<'static, Result<HashMap<BatchKey, V>, E>>,
    pub cancel: Box<dyn FnOnce() + Send>,
}

impl<V, E> BatchFetch<V, E> {
    pub fn new(result: impl Future<Output = Result<HashMap<BatchKey, V>, E>> + Send + 'static) -> Self {
        BatchFetch {
            result: Box::pin(result),
            cancel: Box::new(|| {}),
        }
    }

    pub fn with_cancel(mut self, cancel: impl FnOnce() + Send + 'static) -> Self {
        self.cancel = Box::new(cancel);
        self
    }
}

pub trait BatchLoader: Send + Sync + 'static {
    type Item: Send + 'static;
    type Output: Send + 'static;
    type Error: Clone + Send + 'static;

    /// Whether `pending` (the open batch with the candidate appended last)
    /// may go out as one call. Must be pure.
    fn validate(&self, _pending: &[Self::Item]) -> bool {
        true
    }

    /// Performs one transport call for the whole batch.
    fn fetch(&self, batch: Vec<Keyed<Self::Item>>) -> BatchFetch<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError<E> {
    #[error("batch fetch failed: {0}")]
    Fetch(E),
    #[error("batch response has no entry for key {0}")]
    Missing(BatchKey),
    #[error("load cancelled")]
    Cancelled,
}

/// What [`LoadCanceller::cancel`] managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from a batch that had not been sent yet.
    Dequeued,
    /// The batch was already sent; only local delivery is suppressed.
    Suppressed,
    /// Already delivered or cancelled.
    Settled,
}

type Resolver<L> = oneshot::Sender<
    Result<<L as BatchLoader>::Output, LoadError<<L as BatchLoader>::Error>>,
>;

struct PendingBatch<L: BatchLoader> {
    keys: Vec<BatchKey>,
    items: Vec<L::Item>,
    resolvers: HashMap<BatchKey, Resolver<L>>,
}

impl<L: BatchLoader> PendingBatch<L> {
    fn single(key: BatchKey, item: L::Item, resolver: Resolver<L>) -> Self {
        PendingBatch {
            keys: vec![key],
            items: vec![item],
            resolvers: HashMap::from([(key, resolver)]),
        }
    }

    fn remove(&mut self, key: BatchKey) -> bool {
        match self.keys.iter().position(|k| *k == key) {
            Some(pos) => {
                self.keys.remove(pos);
                self.items.remove(pos);
                self.resolvers.remove(&key);
                true
            }
            None => false,
        }
    }
}

struct InFlight {
    remaining: AtomicUsize,
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl InFlight {
    fn release_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let cancel = self.cancel.lock().take();
            if let Some(cancel) = cancel {
                debug!("every member of the batch was cancelled, aborting the call");
                cancel();
            }
        }
    }
}

struct State<L: BatchLoader> {
    next_key: BatchKey,
    open: Vec<PendingBatch<L>>,
    flush_scheduled: bool,
    in_flight: HashMap<BatchKey, Arc<InFlight>>,
}

struct Shared<L: BatchLoader> {
    loader: L,
    state: Mutex<State<L>>,
}

trait Dequeue: Send + Sync {
    fn cancel_key(&self, key: BatchKey) -> CancelOutcome;
}

impl<L: BatchLoader> Dequeue for Shared<L> {
    fn cancel_key(&self, key: BatchKey) -> CancelOutcome {
        let mut state = self.state.lock();
        if state.open.iter_mut().any(|batch| batch.remove(key)) {
            debug!(key, "removed cancelled item from pending batch");
            return CancelOutcome::Dequeued;
        }
        match state.in_flight.remove(&key) {
            Some(in_flight) => {
                drop(state);
                in_flight.release_one();
                CancelOutcome::Suppressed
            }
            None => CancelOutcome::Settled,
        }
    }
}

/// Coalesces loads issued in the same scheduling turn into batch calls.
///
/// `load` must be called from within a Tokio runtime.
pub struct DataLoader<L: BatchLoader> {
    shared: Arc<Shared<L>>,
}

impl<L: BatchLoader> Clone for DataLoader<L> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<L: BatchLoader> DataLoader<L> {
    pub fn new(loader: L) -> Self {
        DataLoader {
            shared: Arc::new(Shared {
                loader,
                state: Mutex::new(State {
                    next_key: 0,
                    open: Vec::new(),
                    flush_scheduled: false,
                    in_flight: HashMap::new(),
                }),
            }),
        }
    }

    pub fn loader(&self) -> &L {
        &self.shared.loader
    }

    pub fn load(&self, item: L::Item) -> Load<L::Output, L::Error> {
        let (tx, rx) = oneshot::channel();
        let (key, schedule) = {
            let mut state = self.shared.state.lock();
            let key = state.next_key;
            state.next_key += 1;

            match state.open.last_mut() {
                Some(batch) => {
                    batch.items.push(item);
                    if self.shared.loader.validate(&batch.items) {
                        batch.keys.push(key);
                        batch.resolvers.insert(key, tx);
                    } else if let Some(item) = batch.items.pop() {
                        debug!(key, "validator rejected item, starting a new batch");
                        state.open.push(PendingBatch::single(key, item, tx));
                    }
                }
                None => state.open.push(PendingBatch::single(key, item, tx)),
            }

            let schedule = !state.flush_scheduled;
            state.flush_scheduled = true;
            (key, schedule)
        };

        if schedule {
            tokio::spawn(flush(self.shared.clone()));
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let future = Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => Err(LoadError::Cancelled),
                outcome = rx => outcome.unwrap_or(Err(LoadError::Cancelled)),
            }
        });

        Load {
            key,
            future,
            canceller: LoadCanceller {
                key,
                token,
                queue: self.shared.clone(),
            },
        }
    }

    /// Number of items waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.shared
            .state
            .lock()
            .open
            .iter()
            .map(|batch| batch.keys.len())
            .sum()
    }
}

async fn flush<L: BatchLoader>(shared: Arc<Shared<L>>) {
    if is_multi_thread() {
        settle(&shared).await;
    }

    let batches: Vec<(PendingBatch<L>, Arc<InFlight>)> = {
        let mut state = shared.state.lock();
        state.flush_scheduled = false;
        let open = std::mem::take(&mut state.open);
        let mut batches = Vec::with_capacity(open.len());
        for batch in open.into_iter().filter(|batch| !batch.keys.is_empty()) {
            let in_flight = Arc::new(InFlight {
                remaining: AtomicUsize::new(batch.keys.len()),
                cancel: Mutex::new(None),
            });
            for key in &batch.keys {
                state.in_flight.insert(*key, in_flight.clone());
            }
            batches.push((batch, in_flight));
        }
        batches
    };

    for (batch, in_flight) in batches {
        dispatch(&shared, batch, in_flight);
    }
}

fn is_multi_thread() -> bool {
    Handle::try_current().is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
}

/// Yields until a full yield passes without a new load.
async fn settle<L: BatchLoader>(shared: &Shared<L>) {
    let mut seen = shared.state.lock().next_key;
    for round in 0..MAX_SETTLE_ROUNDS {
        tokio::task::yield_now().await;
        let now = shared.state.lock().next_key;
        if now == seen {
            return;
        }
        debug!(round, arrived = now - seen, "batch window still filling");
        seen = now;
    }
    warn!("batch window did not settle, flushing anyway");
}

fn dispatch<L: BatchLoader>(shared: &Arc<Shared<L>>, batch: PendingBatch<L>, in_flight: Arc<InFlight>) {
    let PendingBatch {
        keys,
        items,
        mut resolvers,
    } = batch;
    let frozen: Vec<Keyed<L::Item>> = keys
        .iter()
        .copied()
        .zip(items)
        .map(|(key, item)| Keyed { key, item })
        .collect();
    debug!(size = frozen.len(), "flushing batch");

    let BatchFetch { result, cancel } = shared.loader.fetch(frozen);
    *in_flight.cancel.lock() = Some(cancel);
    // Everything may have been cancelled between the freeze and the fetch.
    if in_flight.remaining.load(Ordering::Acquire) == 0 {
        let cancel = in_flight.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    let shared = shared.clone();
    tokio::spawn(async move {
        let outcome = result.await;
        {
            let mut state = shared.state.lock();
            for key in &keys {
                state.in_flight.remove(key);
            }
        }

        match outcome {
            Ok(mut entries) => {
                if entries.len() != keys.len() {
                    warn!(
                        expected = keys.len(),
                        received = entries.len(),
                        "batch result size does not match the batch"
                    );
                }
                for key in &keys {
                    let value = entries.remove(key).ok_or(LoadError::Missing(*key));
                    if let Some(resolver) = resolvers.remove(key) {
                        let _ = resolver.send(value);
                    }
                }
                if !entries.is_empty() {
                    warn!(unknown = ?entries.keys().collect::<Vec<_>>(), "dropping results for unknown batch keys");
                }
            }
            Err(err) => {
                for (_, resolver) in resolvers.drain() {
                    let _ = resolver.send(Err(LoadError::Fetch(err.clone())));
                }
            }
        }
    });
}

/// Cancels one load. Cloneable and usable while the [`Load`] is awaited.
#[derive(Clone)]
pub struct LoadCanceller {
    key: BatchKey,
    token: CancellationToken,
    queue: Arc<dyn Dequeue>,
}

impl LoadCanceller {
    pub fn cancel(&self) -> CancelOutcome {
        if self.token.is_cancelled() {
            return CancelOutcome::Settled;
        }
        self.token.cancel();
        self.queue.cancel_key(self.key)
    }
}

impl std::fmt::Debug for LoadCanceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCanceller").field("key", &self.key).finish()
    }
}

/// Pending result of one [`DataLoader::load`].
pub struct Load<V, E> {
    key: BatchKey,
    future: BoxFuture<'static, Result<V, LoadError<E>>>,
    canceller: LoadCanceller,
}

impl<V, E> Load<V, E> {
    pub fn key(&self) -> BatchKey {
        self.key
    }

    pub fn canceller(&self) -> LoadCanceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) -> CancelOutcome {
        self.canceller.cancel()
    }
}

impl<V, E> Future for Load<V, E> {
    type Output = Result<V, LoadError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}
