use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::batch::{with_batch_endpoint, BatchConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub batch: BatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            host: "127.0.0.1".to_string(),
            batch: BatchConfig::default(),
        }
    }
}

/// Wraps an application router with the batch endpoint, a health check and
/// the HTTP middleware stack.
#[derive(Clone)]
pub struct BatchServer {
    config: ServerConfig,
    app: Router,
}

impl BatchServer {
    pub fn new(config: ServerConfig, app: Router) -> Self {
        BatchServer { config, app }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The full router: application routes, `GET /health`, and the batch
    /// endpoint dispatching into both.
    pub fn router(&self) -> Router {
        let health = Router::new()
            .route("/health", get(handle_health))
            .with_state(Arc::new(self.config.clone()));
        let app = self.app.clone().merge(health);
        with_batch_endpoint(app, self.config.batch.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!("Server listening on {}", addr);
        info!("  Batch endpoint: http://{}{}", addr, self.config.batch.path);
        info!("  Health endpoint: http://{}/health", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn handle_health(State(config): State<Arc<ServerConfig>>) -> impl IntoResponse {
    let health_response = serde_json::json!({
        "status": "healthy",
        "server": "batchlink",
        "version": env!("CARGO_PKG_VERSION"),
        "max_batch_size": config.batch.max_batch_size,
        "endpoints": {
            "batch": config.batch.path,
            "health": "/health"
        }
    });

    (StatusCode::OK, Json(health_response))
}
