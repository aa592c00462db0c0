use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quotagate::config::{QuotagateConfig, RateLimitSettings, StorageBackend};
use quotagate::http::{router, HttpServer, InterceptorConfig};
use quotagate::ratelimit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore};

/// How often the in-memory store drops lapsed counters.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "quotagate")]
#[command(author = "Quotagate Contributors")]
#[command(version)]
#[command(about = "Per-caller, per-endpoint request rate limiting", long_about = None)]
struct Args {
    /// Address the HTTP server listens on; overrides QUOTAGATE_LISTEN_ADDR
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init(),
    }

    info!("Starting Quotagate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = QuotagateConfig::from_env().context("invalid configuration")?;
    if let Some(addr) = args.listen_addr {
        config.server.listen_addr = addr;
    }
    let settings = config.rate_limiting;
    let rules = settings.rules().context("failed to load category rules")?;
    info!(
        enabled = settings.enabled,
        storage = ?settings.storage,
        default_requests = settings.default_requests,
        window_secs = settings.default_window_secs,
        rules = rules.rules.len(),
        "Configuration loaded"
    );

    let store = build_store(&settings).await?;
    let limiter = Arc::new(RateLimiter::new(store, Arc::new(settings.policy())));
    info!(backend = limiter.backend_name(), "Rate limiter initialized");

    let app = router(limiter, InterceptorConfig::from_settings(&settings, rules));
    HttpServer::new(config.server.listen_addr, app)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Quotagate stopped");
    Ok(())
}

async fn build_store(settings: &RateLimitSettings) -> anyhow::Result<Arc<dyn CounterStore>> {
    match settings.storage {
        StorageBackend::Memory => {
            let store = Arc::new(MemoryCounterStore::new());
            store.spawn_sweeper(SWEEP_INTERVAL);
            Ok(store)
        }
        StorageBackend::Redis => {
            let store = RedisCounterStore::connect_with_config(settings.redis())
                .await
                .context("failed to connect to Redis")?;
            Ok(Arc::new(store))
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
