use batchlink_core::{create_chain, LinkResult, Next, Operation, OperationKind, OperationLink, SharedLink};
use std::sync::Arc;
use tracing::trace;

pub type Predicate = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

/// Routes each operation to one of two sub-chains. Neither sub-chain
/// continues into the links that follow the split.
#[derive(Clone)]
pub struct SplitLink {
    predicate: Predicate,
    when_true: Vec<SharedLink>,
    when_false: Vec<SharedLink>,
}

impl SplitLink {
    pub fn new(
        predicate: impl Fn(&Operation) -> bool + Send + Sync + 'static,
        when_true: Vec<SharedLink>,
        when_false: Vec<SharedLink>,
    ) -> Self {
        SplitLink {
            predicate: Arc::new(predicate),
            when_true,
            when_false,
        }
    }

    /// Batchable operations go to `batched`, everything else to `direct`.
    pub fn batching(batched: Vec<SharedLink>, direct: Vec<SharedLink>) -> Self {
        Self::new(is_batchable, batched, direct)
    }
}

/// Subscriptions stream their response and blobs need a request of their
/// own, so neither can share a batch.
pub fn is_batchable(op: &Operation) -> bool {
    op.kind != OperationKind::Subscription
        && !op.params.body.as_ref().is_some_and(|body| body.contains_blob())
}

impl OperationLink for SplitLink {
    fn run(&self, op: Operation, _next: Next<'_>) -> LinkResult {
        let matched = (self.predicate)(&op);
        trace!(op = %op.id, matched, "split");
        if matched {
            create_chain(&self.when_true, op)
        } else {
            create_chain(&self.when_false, op)
        }
    }
}
