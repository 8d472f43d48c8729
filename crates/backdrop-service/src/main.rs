//! Backdrop Service - credit accounting and job intake for background replacement
//!
//! This is the main entry point for the backdrop service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backdrop_service::{collaborators, create_router, AppState, ServiceConfig};
use backdrop_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,backdrop=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Backdrop Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        environment = %config.environment,
        storage_configured = %config.storage_base_url.is_some(),
        queue_configured = %config.queue_url.is_some(),
        max_batch_size = config.intake.max_batch_size,
        "Service configuration loaded"
    );

    let store = open_store(&config)?;
    let (storage, queue) = collaborators::from_config(&config)?;

    // Build app state
    let state = AppState::new(store, config.clone(), storage, queue)?;

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(backdrop_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(_config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    tracing::warn!("Built without RocksDB - using the in-memory store; data will not persist");
    Ok(Arc::new(backdrop_store::MemoryStore::new()))
}
