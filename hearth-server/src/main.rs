mod routes;
mod scheduler;
mod singleton;
mod state;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hearth_core::{Aggregator, Cache, ConfigProvider, FileConfig, HttpTransport};

use crate::state::AppState;

const DEFAULT_PORT: u16 = 4097;

#[derive(Parser, Debug)]
#[command(name = "hearth-server", version, about = "Serve the merged household agenda to dashboard displays")]
struct Args {
    /// Config file (defaults to $HEARTH_CONFIG or ~/.config/hearth/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,
}

fn init_logging() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set up logging")?;

    Ok(())
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::agenda::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => FileConfig::default_path()?,
    };
    if !config_path.exists() {
        FileConfig::create_default_config(&config_path)?;
        info!(path = %config_path.display(), "Created default configuration");
    }

    let provider = Arc::new(FileConfig::new(&config_path));
    let config = provider
        .load()
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    // Ensure only one instance writes the cache
    let cache_path = config.cache.resolved_path();
    let lock = singleton::acquire_lock(cache_path.as_deref())?;
    info!(lock = %lock.path().display(), "Acquired instance lock");

    let cache = match &cache_path {
        Some(path) => Cache::open(path).await,
        None => Cache::in_memory(),
    };
    let transport = HttpTransport::new(&config.fetch.user_agent)?;
    let aggregator = Arc::new(Aggregator::new(
        provider,
        Arc::new(transport),
        Arc::new(cache),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = scheduler::spawn(aggregator.clone(), shutdown_rx);

    let app = app(AppState::new(aggregator));
    let addr = SocketAddr::new(args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("hearth-server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    scheduler.await?;

    Ok(())
}
