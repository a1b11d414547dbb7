//! Muse Server - Main entry point

use anyhow::Result;
use muse_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{info, warn};

use muse_server::{
    api,
    config::{Config, ObjectBackend, TableBackend},
    features::FeatureState,
    ingest::{IngestOrchestrator, PipelineContext},
    objects::{MemoryObjectStore, S3ObjectStore, SharedObjects},
    repository::Repository,
    search::{DisabledIndexer, HttpSearchIndexer, SharedIndexer},
    table::{MemoryItemStore, PgItemStore, SharedStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("muse-server")
        .filter_directives("muse_server=debug,tower_http=debug,sqlx=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting Muse Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let store = item_store(&config).await?;
    let objects = object_store(&config).await?;
    let indexer = search_indexer(&config)?;

    let repo = Repository::new(store);
    let pipeline = PipelineContext::new(
        repo.clone(),
        objects.clone(),
        indexer,
        config.pipeline.clone(),
    );
    let orchestrator = Arc::new(IngestOrchestrator::new(pipeline));
    let (pipeline_handle, pipeline_task) = orchestrator.clone().start();

    let resumed = orchestrator.resume_pending(&pipeline_handle).await?;
    info!(resumed, "Ingestion orchestrator started");

    let state = FeatureState {
        repo,
        objects,
        pipeline: pipeline_handle,
        uploads: config.uploads.clone(),
    };
    let app = api::create_router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last handles; the dispatcher drains in-flight
    // uploads and exits. Runs cut short here are resumed on the next start.
    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    info!("Draining ingestion pipeline for up to {:?}", drain_timeout);
    match tokio::time::timeout(drain_timeout, pipeline_task).await {
        Ok(Ok(())) => info!("Ingestion pipeline drained"),
        Ok(Err(e)) => tracing::error!("Ingestion orchestrator task failed: {}", e),
        Err(_) => warn!("Ingestion pipeline still busy after {:?}, exiting", drain_timeout),
    }

    info!("Server shut down gracefully");
    Ok(())
}

async fn item_store(config: &Config) -> Result<SharedStore> {
    Ok(match config.table.backend {
        TableBackend::Memory => {
            info!("Using in-memory item store");
            Arc::new(MemoryItemStore::new())
        }
        TableBackend::Postgres => {
            let store = PgItemStore::connect(&config.table).await?;
            store.migrate().await?;
            info!("Database migrations completed");
            Arc::new(store)
        }
    })
}

async fn object_store(config: &Config) -> Result<SharedObjects> {
    Ok(match config.objects.backend {
        ObjectBackend::Memory => {
            info!("Using in-memory object store");
            Arc::new(MemoryObjectStore::new(config.objects.bucket.clone()))
        }
        ObjectBackend::S3 => Arc::new(S3ObjectStore::new(&config.objects).await?),
    })
}

fn search_indexer(config: &Config) -> Result<SharedIndexer> {
    if !config.search.enabled {
        info!("Search indexing is disabled (SEARCH_ENABLED=false)");
        return Ok(Arc::new(DisabledIndexer));
    }
    Ok(Arc::new(HttpSearchIndexer::new(&config.search)?))
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received terminate signal, starting graceful shutdown"),
    }
}
