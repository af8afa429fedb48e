// Request pipeline core
pub mod chain;
pub mod codec;
pub mod dataloader;
pub mod error;
pub mod observable;
pub mod operation;
pub mod wire;

pub use chain::{create_chain, link_fn, LinkResult, Next, OperationLink, OperationObservable, SharedLink};
pub use dataloader::{
    BatchFetch, BatchKey, BatchLoader, CancelOutcome, DataLoader, Keyed, Load, LoadCanceller, LoadError,
};
pub use error::{ChainError, LinkError, TransportFailure};
pub use observable::{map, share, tap, Observable, Observer, ObserverFns, Subscriber, Subscription, Teardown};
pub use operation::{
    Operation, OperationContext, OperationId, OperationKind, OperationParams, Response, ResultEnvelope,
};
pub use wire::{BatchEntry, BatchItem, BatchRequestItem, DEFAULT_BATCH_PATH};

// Re-exported so downstream crates name the same types.
pub use http::Method;
pub use tokio_util::sync::CancellationToken;
