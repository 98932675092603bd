use anyhow::Result;
use memo_mirror_sync::{
    open_database, router, AppState, FlomoClient, QueryService, SyncConfig, SyncOrchestrator,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Memo Mirror Sync Service v{}", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::from_env()?;
    let db = open_database(&config)?;
    info!("Database initialized at: {}", config.db_path.display());

    let remote = Arc::new(FlomoClient::new(&config)?);
    let orchestrator = SyncOrchestrator::new(Arc::clone(&db), remote, config.sync_options())?;
    let query = QueryService::new(db);

    let app = router(AppState::new(orchestrator.clone(), query));

    info!("Starting HTTP server on {}", config.service_addr);
    let listener = tokio::net::TcpListener::bind(&config.service_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            orchestrator.cancel();
        })
        .await?;

    Ok(())
}
