use tokio::net::TcpListener;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();
    let cfg = orbit_reporter::Config::from_env();
    // Storage presence up front, so the first request never races the
    // directory creation.
    orbit_reporter::store::ReportStore::new(cfg.data_dir.clone())
        .ensure()
        .await?;
    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = orbit_reporter::app(cfg);
    let listener = TcpListener::bind(addr).await?;
    info!("coordination node listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
