use axum::{
    body::{to_bytes, Body},
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use batchlink_core::codec::{decode_response, encode_body, method_allows_body, Payload};
use batchlink_core::wire::{BatchEntry, BatchRequestDecoder, BatchRequestItem, DEFAULT_BATCH_PATH};
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;
use tower::ServiceExt;
use tracing::{debug, error, warn};

/// Upper bound on the body read back from one sub-request.
const MAX_SUB_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Route the batch endpoint is mounted on.
    pub path: String,
    /// Batches with more items are rejected before any sub-request runs.
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            path: DEFAULT_BATCH_PATH.to_string(),
            max_batch_size: 100,
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch request must be multipart/form-data: {0}")]
    NotMultipart(String),
    #[error("malformed batch body: {0}")]
    Malformed(String),
    #[error("batch has {count} items, the limit is {max}")]
    TooLarge { count: usize, max: usize },
}

impl BatchError {
    fn status(&self) -> StatusCode {
        match self {
            BatchError::NotMultipart(_) | BatchError::Malformed(_) => StatusCode::BAD_REQUEST,
            BatchError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        warn!(error = %self, "rejecting batch request");
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
struct BatchState {
    /// The application router without the batch route, so sub-requests can
    /// never recurse into another batch.
    router: Router,
    config: BatchConfig,
}

/// Mounts the batch endpoint on `app`. Sub-requests are dispatched to `app`
/// as it was before the batch route was added.
pub fn with_batch_endpoint(app: Router, config: BatchConfig) -> Router {
    let path = config.path.clone();
    let state = BatchState {
        router: app.clone(),
        config,
    };
    app.route(&path, post(handle_batch).with_state(state))
}

async fn handle_batch(
    State(state): State<BatchState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BTreeMap<usize, BatchEntry>>, BatchError> {
    let mut multipart = multipart.map_err(|e| BatchError::NotMultipart(e.body_text()))?;

    let mut decoder = BatchRequestDecoder::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BatchError::Malformed(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            warn!("skipping unnamed batch field");
            continue;
        };
        let bytes = field.bytes().await.map_err(|e| BatchError::Malformed(e.body_text()))?;
        let Ok(value) = String::from_utf8(bytes.to_vec()) else {
            warn!(field = %name, "skipping batch field that is not UTF-8");
            continue;
        };
        decoder.push_field(&name, value);

        if decoder.len() > state.config.max_batch_size {
            return Err(BatchError::TooLarge {
                count: decoder.len(),
                max: state.config.max_batch_size,
            });
        }
    }

    let items = decoder.finish();
    debug!(items = items.len(), "dispatching batch");
    Ok(Json(dispatch(&state.router, &headers, items).await))
}

/// Runs every item concurrently, each on its own task, and collects the
/// entries that produced a response. Failed items are logged and omitted.
pub async fn dispatch(
    router: &Router,
    headers: &HeaderMap,
    items: BTreeMap<usize, BatchRequestItem>,
) -> BTreeMap<usize, BatchEntry> {
    let mut handles = Vec::with_capacity(items.len());
    for (index, item) in items {
        let request = match sub_request(&item, headers) {
            Ok(request) => request,
            Err(err) => {
                error!(index, path = %item.path, error = %err, "could not build batch sub-request");
                continue;
            }
        };
        let router = router.clone();
        handles.push((index, tokio::spawn(run_sub_request(router, request))));
    }

    let (indices, tasks): (Vec<usize>, Vec<_>) = handles.into_iter().unzip();
    let outcomes = join_all(tasks).await;

    let mut entries = BTreeMap::new();
    for (index, outcome) in indices.into_iter().zip(outcomes) {
        match outcome {
            Ok(Ok(entry)) => {
                entries.insert(index, entry);
            }
            Ok(Err(message)) => error!(index, error = %message, "batch sub-request failed"),
            Err(join_err) => error!(index, error = %join_err, "batch sub-request aborted"),
        }
    }
    entries
}

fn sub_request(item: &BatchRequestItem, headers: &HeaderMap) -> Result<Request<Body>, axum::http::Error> {
    let mut forwarded = HeaderMap::new();
    for (name, value) in headers {
        forwarded.append(name.clone(), value.clone());
    }
    for (name, value) in &item.headers.to_header_map() {
        forwarded.insert(name.clone(), value.clone());
    }
    forwarded.remove(header::CONTENT_TYPE);
    forwarded.remove(header::CONTENT_LENGTH);

    let mut builder = Request::builder().method(item.method.clone()).uri(&item.path);
    for (name, value) in &forwarded {
        builder = builder.header(name, value);
    }

    // Same encoding the direct link would have chosen for this body.
    let body = match item.body.as_ref().filter(|_| method_allows_body(&item.method)) {
        None => Body::empty(),
        Some(value) => {
            let encoded = encode_body(&Payload::from(value.clone()));
            builder = builder.header(header::CONTENT_TYPE, encoded.content_type());
            Body::from(encoded.to_bytes())
        }
    };
    builder.body(body)
}

async fn run_sub_request(router: Router, request: Request<Body>) -> Result<BatchEntry, String> {
    let response = match router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), MAX_SUB_RESPONSE_BYTES)
        .await
        .map_err(|e| e.to_string())?;
    let data = decode_response(content_type.as_deref(), &bytes).map_err(|e| e.to_string())?;
    Ok(BatchEntry::new(status, &data))
}
