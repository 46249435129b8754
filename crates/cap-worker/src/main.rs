//! Caption workflow worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cap_media::YtDlp;
use cap_store::{Database, JobStore, StoreConfig, UserRepository, VideoRepository};
use cap_whisper::WhisperClient;
use cap_worker::{
    ChannelHandler, Collaborators, HandlerRegistry, SingleVideoHandler, WorkerConfig, WorkflowRunner,
};
use cap_youtube::{CaptionClient, ChannelClient};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cap=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting cap-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        cap_worker::metrics::install_exporter(addr).context("failed to install metrics exporter")?;
        info!(%addr, "Metrics exporter listening");
    }

    let db = Database::connect(&StoreConfig::from_env())
        .await
        .context("failed to open database")?;
    db.migrate().await.context("failed to migrate database")?;

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("failed to create work dir {}", config.work_dir.display()))?;

    let ytdlp = YtDlp::from_env();
    if let Err(e) = ytdlp.check_available() {
        warn!("yt-dlp is not available, downloads will fail: {}", e);
    }

    let users = Arc::new(UserRepository::new(db.clone()));
    let collaborators = Collaborators {
        acquirer: Arc::new(ytdlp),
        transcriber: Arc::new(WhisperClient::from_env().context("failed to create transcription client")?),
        uploader: Arc::new(CaptionClient::from_env().context("failed to create caption client")?),
        videos: Arc::new(VideoRepository::new(db.clone())),
        credits: users.clone(),
    };

    let handlers = HandlerRegistry::new()
        .with(Arc::new(SingleVideoHandler::new(config.clone(), collaborators)))
        .with(Arc::new(ChannelHandler::new(
            config.clone(),
            Arc::new(ChannelClient::from_env().context("failed to create channel client")?),
            Arc::new(JobStore::new(db.clone())),
        )));
    let runner = WorkflowRunner::new(JobStore::new(db.clone()), users, handlers).with_config(&config);
    info!(worker = %runner.name(), "Runner ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal, finishing current job");
        let _ = shutdown_tx.send(true);
    });

    runner.run(shutdown_rx).await;
    db.close().await;
    Ok(())
}
