use std::net::SocketAddr;
use std::sync::Arc;

use cadence_core::CadenceConfig;
use cadence_scheduler::{HandlerRegistry, Runtime, SqliteJobStore};
use clap::Parser;
use tracing::{info, warn};

mod app;
mod handlers;
mod http;
mod rates;

#[derive(Parser, Debug)]
#[command(name = "cadence-gateway", version, about = "Persistent job scheduler with an HTTP API")]
struct Cli {
    /// Config file (default: $CADENCE_CONFIG, then ~/.cadence/cadence.toml).
    #[arg(short, long)]
    config: Option<String>,

    /// Override `gateway.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `gateway.port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence_gateway=info,cadence_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli.config.or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let mut config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });
    if let Some(bind) = cli.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(SqliteJobStore::new(db)?);
    let rates_db = rusqlite::Connection::open(db_path)?;
    rates_db.busy_timeout(std::time::Duration::from_secs(5))?;
    let book = Arc::new(rates::RateBook::new(rates_db, &config.rates.base)?);
    info!("database migrations complete");

    let registry = Arc::new(HandlerRegistry::new());
    handlers::register_builtin(&registry);
    if config.rates.is_enabled() {
        rates::register(&registry, Arc::clone(&book), rates::RateFetcher::new(&config.rates)?);
    }
    info!(handlers = ?registry.names(), "job handlers registered");

    let runtime = Runtime::start(store, registry, &config);
    if let Err(e) = rates::ensure_refresh_job(runtime.service(), &config.rates).await {
        warn!("could not register the exchange-rate refresh job: {e}");
    }
    let state = Arc::new(app::AppState::new(runtime.service().clone(), book));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!(instance = %runtime.instance(), "Cadence gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // drain in-flight jobs before exiting
    runtime.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
