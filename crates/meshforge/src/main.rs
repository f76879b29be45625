use anyhow::{Context, Result};
use assetstore::{AssetStore, HttpFetcher};
use clap::Parser;
use forgeconf::ForgeConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use meshforge::backend::{GradioClient, RemoteBackend};
use meshforge::{detect, telemetry, web, ForgeContext};

/// Image-to-3D orchestration server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to layer over the system and user files
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Mesh backend (`owner/name` or URL)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        ForgeConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.infra.bind.http_port = port;
    }
    if let Some(endpoint) = cli.endpoint {
        config.backend.endpoint = endpoint;
    }

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry).context("Failed to initialize telemetry")?;

    let asset_dir = &config.infra.paths.asset_dir;
    tracing::info!("📦 Opening asset store at {}", asset_dir.display());
    let fetcher = HttpFetcher::new(
        config.backend.hf_token.clone(),
        config.backend.request_timeout(),
    )
    .context("Failed to build asset fetcher")?;
    let store = AssetStore::open(asset_dir)
        .context("Failed to open asset store")?
        .with_fetcher(Arc::new(fetcher));

    let mesh: Arc<dyn RemoteBackend> = Arc::new(
        GradioClient::new(
            &config.backend.endpoint,
            config.backend.hf_token.clone(),
            config.backend.request_timeout(),
        )
        .context("Invalid mesh backend endpoint")?,
    );
    let image: Arc<dyn RemoteBackend> = Arc::new(
        GradioClient::new(
            &config.backend.image_endpoint,
            config.backend.hf_token.clone(),
            config.backend.request_timeout(),
        )
        .context("Invalid image backend endpoint")?,
    );

    tracing::info!("🔍 Detecting backend variant for {}...", mesh.endpoint());
    let variant = detect::detect(mesh.as_ref(), config.backend.introspection_timeout())
        .await
        .context("Backend detection failed")?;
    tracing::info!("   {} -> {}", mesh.endpoint(), variant);

    let ctx = Arc::new(ForgeContext::new(&config, variant, mesh, image, store));
    let shutdown_token = CancellationToken::new();

    let addr = config.infra.bind.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown_srv = shutdown_token.clone();
    let server = axum::serve(listener, web::router(ctx.clone())).with_graceful_shutdown(async move {
        shutdown_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    tracing::info!("🧊 meshforge listening on http://{}", addr);

    let stats_ctx = ctx.clone();
    let stats_ct = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    stats_ctx.limiter.prune();
                    let stats = stats_ctx.tracker.stats();
                    tracing::info!(
                        operations.total = stats.total,
                        operations.active = stats.active,
                        operations.completed = stats.completed,
                        operations.failed = stats.failed,
                        listeners = stats_ctx.notifier.listener_count(),
                        "Server statistics"
                    );
                }
                _ = stats_ct.cancelled() => break,
            }
        }
    });

    wait_for_signal().await;
    shutdown_token.cancel();
    let _ = server_task.await;

    tracing::info!("Shutdown complete");
    telemetry::shutdown()?;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    let sigterm = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Cannot install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = sigterm => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}
