use owmh_ingest::config::Config;
use owmh_ingest::fetcher::ReqwestFetcher;
use owmh_ingest::scheduler::Scheduler;
use owmh_ingest::store::JsonStateStore;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,owmh_ingest=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("OpenWeatherMap History Ingestion Service starting...");

    // Load configuration
    let config = Config::load("config/config.yaml").map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration: {}\n\n\
             Make sure:\n\
             1. config/config.yaml exists\n\
             2. All required environment variables are set (e.g. OWM_API_KEY)\n\
             3. Create a .env file if needed",
            e
        )
    })?;
    info!(
        "Configuration loaded: {} location(s), state dir {}",
        config.locations.len(),
        config.storage.path
    );

    let fetcher = Arc::new(ReqwestFetcher::new()?);
    let store = Arc::new(JsonStateStore::new(&config.storage.path));

    // Set up shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Create and run scheduler
    let mut scheduler = Scheduler::new(config, fetcher, store, shutdown_rx)?;

    if let Err(e) = scheduler.run().await {
        error!("Scheduler error: {}", e);
    }

    info!("OpenWeatherMap History Ingestion Service shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
