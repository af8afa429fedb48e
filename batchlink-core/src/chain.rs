//! Link-chain executor.
//!
//! Each link receives the operation and a [`Next`] bound to the following
//! link. A link may forward (possibly after rewriting the operation), answer
//! on its own without calling `next`, or hand the operation to a different
//! sub-chain. The chain ends at whichever link performs the work itself.

use crate::error::{ChainError, LinkError};
use crate::observable::Observable;
use crate::operation::{Operation, ResultEnvelope};
use std::sync::Arc;

pub type OperationObservable = Observable<ResultEnvelope, LinkError>;

/// Synchronous outcome of running a link. `Err` means the chain itself is
/// misconfigured; runtime failures travel through the observable.
pub type LinkResult = Result<OperationObservable, ChainError>;

pub trait OperationLink: Send + Sync {
    fn run(&self, op: Operation, next: Next<'_>) -> LinkResult;
}

impl<F> OperationLink for F
where
    F: Fn(Operation, Next<'_>) -> LinkResult + Send + Sync,
{
    fn run(&self, op: Operation, next: Next<'_>) -> LinkResult {
        self(op, next)
    }
}

pub type SharedLink = Arc<dyn OperationLink>;

/// Wraps a closure as a link.
pub fn link_fn<F>(f: F) -> SharedLink
where
    F: Fn(Operation, Next<'_>) -> LinkResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Continuation handed to a link; calling it runs the rest of the chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    links: &'a [SharedLink],
    index: usize,
}

impl Next<'_> {
    pub fn call(self, op: Operation) -> LinkResult {
        execute(self.links, self.index, op)
    }

    /// Position of the link this continuation will run.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.links.len().saturating_sub(self.index))
            .finish()
    }
}

fn execute(links: &[SharedLink], index: usize, op: Operation) -> LinkResult {
    let link = links.get(index).ok_or(ChainError::Exhausted { index })?;
    tracing::trace!(op = %op.id, index, "running link");
    link.run(op, Next { links, index: index + 1 })
}

/// Runs `operation` through `links` and returns the observable produced by
/// the first link.
pub fn create_chain(links: &[SharedLink], operation: Operation) -> LinkResult {
    execute(links, 0, operation)
}
