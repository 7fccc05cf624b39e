pub mod api;
pub mod channel;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Max request body size: 1 MiB
const MAX_BODY_BYTES: usize = 1_048_576;
/// Request timeout, comfortably above the per-run execution deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub reporter_url: String,
    pub fuel_limit: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1337);
        let reporter_url = std::env::var("REPORTER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5678".to_string());
        let fuel_limit = std::env::var("FUEL_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(orbit_vm::DEFAULT_FUEL);
        Self {
            port,
            reporter_url,
            fuel_limit,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
}

pub fn app(cfg: Config) -> Router {
    let state = AppState { cfg: Arc::new(cfg) };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/execute", post(api::execute))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

pub mod test {
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Spawn the node on a random port. Returns the address and a
    /// JoinHandle that keeps the server alive until dropped.
    pub async fn spawn(cfg: super::Config) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let app = super::app(cfg);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, handle)
    }
}
