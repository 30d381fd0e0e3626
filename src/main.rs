//! ==============================================================================
//! main.rs - telemetry hub entry point
//! ==============================================================================
//!
//! purpose:
//!     the process the lora gateway posts to and the dashboards connect to.
//!
//! responsibilities:
//!     - load configuration (hub.toml + command line overrides)
//!     - open and migrate the sqlite history
//!     - load the arsenic/barium estimators that are available
//!     - resume a collection period left open by a previous run
//!     - start the heartbeat loop for live-update streams
//!     - serve the http api
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                      hub (this process)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ heartbeat   │  │ web server  │  │ per-viewer sse      │  │
//!     │  │ (15s cycle) │  │ (port 5000) │  │ streams             │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │                │                    │             │
//!     │         └────────────────┼────────────────────┘             │
//!     │                          │                                  │
//!     │                 ┌────────┴─────────┐                        │
//!     │                 │ TelemetryService │ <- service.rs          │
//!     │                 └────────┬─────────┘                        │
//!     │    reading store · period tracker · broadcast hub           │
//!     └──────────────────────────┼──────────────────────────────────┘
//!                                │ sqlx
//!                         ┌──────┴──────┐
//!                         │ database.db │
//!                         └─────────────┘
//!
//! ==============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use water_telemetry_hub::config::HubConfig;
use water_telemetry_hub::estimator::EstimatorGateway;
use water_telemetry_hub::logging;
use water_telemetry_hub::server::{self, AppState};
use water_telemetry_hub::service::TelemetryService;
use water_telemetry_hub::sqlite::SqliteStore;

#[derive(Debug, Parser)]
#[command(name = "water-telemetry-hub", version, about = "LoRa water-quality telemetry hub")]
struct Args {
    /// Path to hub.toml (default: config/hub.toml or ../config/hub.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides [server] bind
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database file, overrides [storage] database
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // step 1: load configuration
    let loaded = HubConfig::load_or_default(args.config.as_deref())?;
    let mut config = loaded.config.clone();
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(database) = args.database {
        config.storage.database = database;
    }

    logging::init_logging(&config.logging.level)?;
    info!("water telemetry hub starting");
    loaded.log_source();
    config.log_summary();

    // step 2: open storage and bring the schema up to date
    let store = SqliteStore::open(&config.storage.database, config.storage.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.storage.database))?;
    let found = store.migrate().await.context("schema migration failed")?;
    info!(from_version = found, database = %config.storage.database, "storage ready");

    // step 3: estimators are optional, missing models only disable enrichment
    let estimators = EstimatorGateway::from_config(&config.estimators);

    // step 4: wire the components
    let service = TelemetryService::open(Arc::new(store), estimators)
        .await
        .context("failed to restore period state")?
        .with_sensor_logging(config.logging.show_sensor_data);

    // step 5: heartbeat loop for live-update streams
    let heartbeat = service
        .hub
        .spawn_heartbeat(Duration::from_secs(config.broadcast.heartbeat_seconds.max(1)));

    // step 6: serve
    let bind = config.server.bind.clone();
    let app = server::router(AppState::new(service, config));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("hub listening on http://{}", bind);

    let result = axum::serve(listener, app).await;

    heartbeat.abort();
    if let Err(e) = &result {
        error!(error = %e, "web server error");
    }
    result.context("web server failed")
}
