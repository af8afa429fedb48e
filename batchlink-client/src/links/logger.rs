use batchlink_core::{
    tap, LinkError, LinkResult, Next, ObserverFns, Operation, OperationId, OperationKind, OperationLink, ResultEnvelope,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Pass-through link that logs each operation and its results.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerLink;

impl OperationLink for LoggerLink {
    fn run(&self, op: Operation, next: Next<'_>) -> LinkResult {
        let (id, kind) = (op.id, op.kind);
        debug!(op = %id, kind = %kind, method = %op.params.method, target = %op.target(), "operation started");
        let started = Instant::now();

        let observer = ObserverFns::new()
            .on_next(move |envelope: ResultEnvelope| log_result(id, kind, &envelope, started))
            .on_error(move |err: LinkError| {
                if err.is_cancelled() {
                    debug!(op = %id, "operation cancelled");
                } else {
                    warn!(op = %id, kind = %kind, error = %err, "operation failed");
                }
            })
            .on_complete(move || debug!(op = %id, "operation complete"));

        Ok(next.call(op)?.pipe(tap(observer)))
    }
}

fn log_result(id: OperationId, kind: OperationKind, envelope: &ResultEnvelope, started: Instant) {
    match envelope {
        ResultEnvelope::Data(response) => info!(
            op = %id,
            kind = %kind,
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "operation result"
        ),
        ResultEnvelope::Started => debug!(op = %id, "subscription started"),
        ResultEnvelope::Stopped => debug!(op = %id, "subscription stopped"),
    }
}
