//! sv-va - Video Analysis Service
//!
//! HTTP service that samples frames from endoscopy recordings, runs
//! them through a vision-language model server, and assembles findings
//! into reviewable sessions with summaries and export bundles. Also
//! hosts the live snapshot workflow used during procedures.

use std::sync::Arc;

use anyhow::Result;
use sv_common::events::EventBus;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sv_va::config::ServiceConfig;
use sv_va::services::inference::HttpInferenceEngine;
use sv_va::services::jobs::{spawn_worker, JobQueue};
use sv_va::services::orchestrator::PipelineOrchestrator;
use sv_va::storage::FrameStore;
use sv_va::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting sv-va (Video Analysis) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::load()?;
    info!("Storage root: {}", config.storage_root.display());
    info!("Model server: {}", config.model_server_url);

    let store = FrameStore::new(&config.storage_root)
        .map_err(|e| anyhow::anyhow!("Failed to initialize storage root: {}", e))?;

    info!("Database: {}", config.database_path.display());
    let db_pool = sv_va::db::init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(100); // 100 event capacity
    info!("Event bus initialized");

    let engine = Arc::new(HttpInferenceEngine::new(
        config.model_server_url.clone(),
        config.model_name.clone(),
        config.inference_timeout_secs,
    ));

    let (jobs, job_rx) = JobQueue::new(8);
    let state = AppState::new(
        db_pool.clone(),
        event_bus.clone(),
        config.clone(),
        store.clone(),
        engine.clone(),
        jobs,
    );

    // The orchestrator shares the health endpoint's last-error slot
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        db_pool,
        store,
        event_bus,
        engine,
        config.clone(),
        state.last_error.clone(),
    ));
    spawn_worker(job_rx, orchestrator);
    info!("Pipeline worker started");

    let app = sv_va::build_router(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
