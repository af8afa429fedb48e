//! End-to-end run of the core pieces without a network: a header link, a
//! batching terminal link, and the wire encoding in between.

use batchlink_core::codec::{FormValue, ResponseData};
use batchlink_core::wire::{decode_batch_fields, encode_batch};
use batchlink_core::{
    create_chain, link_fn, share, BatchEntry, BatchFetch, BatchItem, BatchLoader, DataLoader, Keyed, LinkError,
    Observable, Operation, OperationId, OperationKind, OperationParams, Response, ResultEnvelope, SharedLink,
    Teardown,
};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Answers each item with its own path, after a trip through the wire
/// format. Records the size of every batch.
#[derive(Default)]
struct WireLoader {
    sizes: Mutex<Vec<usize>>,
}

impl BatchLoader for WireLoader {
    type Item = Operation;
    type Output = Response;
    type Error = LinkError;

    fn fetch(&self, batch: Vec<Keyed<Operation>>) -> BatchFetch<Response, LinkError> {
        self.sizes.lock().push(batch.len());
        let items: Vec<BatchItem> = batch
            .iter()
            .map(|keyed| BatchItem {
                method: keyed.item.params.method.clone(),
                target: keyed.item.target(),
                headers: keyed.item.params.headers.clone(),
                body: keyed.item.params.body.clone(),
            })
            .collect();
        let encoded = encode_batch(&items);
        let fields = encoded.parts().iter().filter_map(|part| match &part.value {
            FormValue::Text(text) => Some((part.name.clone(), text.clone())),
            FormValue::File(_) => None,
        });
        let decoded = decode_batch_fields(fields.collect::<Vec<_>>());

        let mut results = HashMap::new();
        for (index, keyed) in batch.iter().enumerate() {
            if let Some(item) = decoded.get(&index) {
                let entry = BatchEntry::new(200, &ResponseData::Json(json!({ "path": item.path })));
                results.insert(keyed.key, Response::ok(entry.data()));
            }
        }
        BatchFetch::new(async move { Ok(results) })
    }
}

fn batching_link(loader: DataLoader<WireLoader>) -> SharedLink {
    link_fn(move |op, _next| {
        let loader = loader.clone();
        Ok(Observable::new(move |subscriber| {
            let load = loader.load(op.clone());
            tokio::spawn(async move {
                match load.await {
                    Ok(response) => {
                        subscriber.next(ResultEnvelope::Data(response));
                        subscriber.complete();
                    }
                    Err(err) => subscriber.error(LinkError::decode(err.to_string())),
                }
            });
            Teardown::none()
        }))
    })
}

fn op(id: u64, path: &str) -> Operation {
    Operation::new(OperationId::new(id), OperationKind::Query, OperationParams::get(path))
}

#[tokio::test]
async fn test_operations_in_one_turn_share_a_batch() {
    let loader = DataLoader::new(WireLoader::default());
    let seen = Arc::new(AtomicUsize::new(0));
    let counted = seen.clone();
    let links = vec![
        link_fn(move |op: Operation, next| {
            counted.fetch_add(1, Ordering::SeqCst);
            next.call(op.with_header("x-trace", "t"))
        }),
        batching_link(loader.clone()),
    ];

    let observables: Vec<_> = ["/a", "/b", "/c"]
        .iter()
        .enumerate()
        .map(|(i, path)| create_chain(&links, op(i as u64 + 1, path)).unwrap())
        .collect();
    let firsts = join_all(observables.iter().map(|obs| obs.first_value())).await;

    let paths: Vec<_> = firsts
        .into_iter()
        .map(|first| first.unwrap().and_then(ResultEnvelope::into_data).unwrap().data)
        .collect();
    assert_eq!(
        paths,
        vec![
            ResponseData::Json(json!({ "path": "/a" })),
            ResponseData::Json(json!({ "path": "/b" })),
            ResponseData::Json(json!({ "path": "/c" })),
        ]
    );
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(*loader.loader().sizes.lock(), vec![3]);
}

#[tokio::test]
async fn test_shared_execution_runs_the_chain_once() {
    let loader = DataLoader::new(WireLoader::default());
    let links = vec![batching_link(loader.clone())];
    let shared = create_chain(&links, op(1, "/a")).unwrap().pipe(share());

    let (first, second) = tokio::join!(shared.first_value(), shared.first_value());
    assert_eq!(first, second);
    assert_eq!(*loader.loader().sizes.lock(), vec![1]);
}
