//! Lesson ingest - watches a lesson folder tree and links new material
//! to class sessions in the managed backend.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use lesson_ingest::config::{Config, settings};
use lesson_ingest::db::{RestStore, RestStoreConfig};
use lesson_ingest::services::{
    FileIngestor, Orchestrator, OrchestratorConfig, RateLimitConfig, RetryConfig, StorageClient,
    TtlDedupCache, logging,
};

use crate::cli::CliOptions;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = CliOptions::from_args();
    let config = Config::from_env()?;

    logging::init(config.log_format);
    tracing::info!("Starting lesson ingest");

    let settings_path = config
        .settings_path
        .clone()
        .or_else(settings::default_path)
        .context("No config directory for the settings file; set INGEST_SETTINGS_PATH")?;
    let root = settings::resolve_watch_root(cli.root.clone(), config.watch_root.clone(), &settings_path)?;
    let root = settings::validate_watch_root(&root)?;
    tracing::info!(root = %root.display(), "Watch root resolved");

    let storage = StorageClient::new(
        config.supabase_url.clone(),
        config.supabase_service_key.clone(),
        config.storage_bucket.clone(),
    );
    if let Err(e) = storage.ensure_bucket(true).await {
        tracing::warn!(error = %e, bucket = %storage.bucket(), "Failed to ensure storage bucket - uploads may fail");
    }

    let store = RestStore::new(RestStoreConfig {
        base_url: config.supabase_url.clone(),
        service_key: config.supabase_service_key.clone(),
        rate_limit: RateLimitConfig {
            requests_per_second: config.requests_per_second,
            burst_size: config.requests_per_second.saturating_mul(2),
        },
        retry: RetryConfig::default(),
    })?;
    tracing::info!("Record store client initialized");

    let ingestor = FileIngestor::new(
        root.clone(),
        Arc::new(store),
        Arc::new(storage),
        Arc::new(TtlDedupCache::new(config.dedup_ttl)),
    );
    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            root,
            drain_interval: config.drain_interval,
            settle_delay: config.settle_delay,
        },
        ingestor,
    );

    if cli.scan_only {
        let summary = orchestrator.run_once().await;
        tracing::info!(
            processed = summary.processed,
            linked = summary.linked,
            failed = summary.failed,
            "Scan finished"
        );
        return Ok(());
    }

    orchestrator.run(shutdown_signal()).await?;
    tracing::info!("Lesson ingest stopped");
    Ok(())
}
