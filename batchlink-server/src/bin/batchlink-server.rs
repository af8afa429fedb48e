//! batchlink demo server
//!
//! Serves a few sample endpoints behind the batch endpoint. Configure with
//! `BATCHLINK_HOST`, `BATCHLINK_PORT`, `BATCHLINK_LOG_DIR` and
//! `BATCHLINK_LOG_FORMAT` (`text` or `json`).

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use batchlink_server::{event_stream_response, init_logging, BatchServer, LogFormat, ServerConfig};
use futures::stream;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

async fn get_user(Path(id): Path<u64>) -> impl IntoResponse {
    Json(json!({ "id": id, "name": format!("user-{}", id) }))
}

async fn create_user(Json(mut body): Json<Value>) -> impl IntoResponse {
    if let Some(fields) = body.as_object_mut() {
        fields.insert("id".to_string(), json!(42));
    }
    (StatusCode::CREATED, Json(body))
}

/// Untyped body: clients recognise the timestamp through the date heuristic.
async fn server_time() -> Body {
    Body::from(chrono::Utc::now().to_rfc3339())
}

async fn fail() -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "this endpoint always fails" })),
    )
}

async fn ticks() -> impl IntoResponse {
    let events = stream::unfold(0u32, |n| async move {
        if n >= 5 {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        Some((json!({ "tick": n }), n + 1))
    });
    event_stream_response(events)
}

fn app() -> Router {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/time", get(server_time))
        .route("/fail", get(fail))
        .route("/ticks", get(ticks))
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::env::var("BATCHLINK_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let log_format = match std::env::var("BATCHLINK_LOG_FORMAT") {
        Ok(raw) => raw.parse::<LogFormat>()?,
        Err(_) => LogFormat::default(),
    };
    let _guard = init_logging(&log_dir, "batchlink-server", log_format)?;

    let mut config = ServerConfig::default();
    if let Ok(host) = std::env::var("BATCHLINK_HOST") {
        config.host = host;
    }
    if let Ok(port) = std::env::var("BATCHLINK_PORT") {
        config.port = port.parse().context("BATCHLINK_PORT must be a port number")?;
    }

    info!(host = %config.host, port = config.port, "starting batchlink demo server");
    BatchServer::new(config, app()).run().await
}
