pub mod api;
pub mod store;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use store::ReportStore;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Max request body size: 1 MiB
const MAX_BODY_BYTES: usize = 1_048_576;
/// Request timeout; must outlast the forwarded execution.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Hop deadline for the forwarded call to the execution node. A run that
/// outlives it still self-submits its report; only the context update and
/// the caller's reply are lost.
const FORWARD_DEADLINE: Duration = Duration::from_secs(1);

/// Fallback shared secret for dev setups; deployments must set API_KEY.
const DEV_SECRET: &str = "ORBITDEVSECRET22";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub executor_url: String,
    pub api_secret: String,
    pub data_dir: String,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5678);
        let executor_url = std::env::var("EXECUTOR_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:1337".to_string());
        let api_secret = std::env::var("API_KEY").unwrap_or_else(|_| {
            tracing::warn!("API_KEY not set, using the dev secret");
            DEV_SECRET.to_string()
        });
        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data/vms".to_string());
        Self {
            port,
            executor_url,
            api_secret,
            data_dir,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: ReportStore,
    pub http: reqwest::Client,
}

pub fn app(cfg: Config) -> Router {
    let store = ReportStore::new(cfg.data_dir.clone());
    let http = reqwest::Client::builder()
        .timeout(FORWARD_DEADLINE)
        .build()
        .unwrap_or_default();
    let state = AppState {
        cfg: Arc::new(cfg),
        store,
        http,
    };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/execute", post(api::execute))
        .route("/api/getReport", get(api::get_report))
        .route("/api/executor/getReport", get(api::executor_get_report))
        .route("/api/executor/postReport", post(api::executor_post_report))
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

    /// Serve an already-bound listener; lets tests resolve the circular
    /// address dependency between the two nodes before anything runs.
    pub fn serve(
        listener: TcpListener,
        cfg: super::Config,
    ) -> tokio::task::JoinHandle<()> {
        let app = super::app(cfg);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        })
    }

    /// Spawn the node on a random port.
    pub async fn spawn(cfg: super::Config) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (addr, serve(listener, cfg))
    }
}
