use tokio::net::TcpListener;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();
    let cfg = orbit_executor::Config::from_env();
    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = orbit_executor::app(cfg);
    let listener = TcpListener::bind(addr).await?;
    info!("execution node listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
