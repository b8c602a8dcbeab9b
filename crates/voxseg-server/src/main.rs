#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::service::handler::{AppState, router};
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use voxseg::{PrecomputedVolume, SegmentLookup, VolumeStore};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let store = PrecomputedVolume::open(&config.volume_path, config.mip, config.fill_missing)?;
    tracing::info!(
        "Opened volume {} with bounds {}",
        config.volume_path,
        store.bounds()
    );
    let lookup = Arc::new(SegmentLookup::new(
        Arc::new(store),
        &config.lookup_config(),
    ));
    let app = router(AppState::new(Arc::clone(&lookup)), config.max_body_bytes);

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            let uds_path = config.server_addr.clone();
            let listener = UnixListener::bind(&uds_path)?;
            log_startup_info(&uds_path, &config);
            let res = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(lookup, providers))
                .await;
            // Best effort; a panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res?;
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let listener = TcpListener::bind(&config.server_addr).await?;
        log_startup_info(&config.server_addr, &config);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(lookup, providers))
            .await?;
    }

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting lookup service on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            "Starting lookup service on {} with {} workers and {} blocks",
            addr,
            config.num_workers,
            config.block_size
        );
    }
}

async fn shutdown_signal(lookup: Arc<SegmentLookup>, providers: TelemetryProviders) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // Lets in-flight lookups finish, then stops the workers. Requests that
    // arrive meanwhile are answered with 503.
    if let Err(e) = lookup.shutdown().await {
        tracing::error!("Error during service shutdown: {:?}", e);
    }

    providers.shutdown();
}
