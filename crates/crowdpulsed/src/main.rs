use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use config::{BusKind, Config};
use dbus_interface::{AnalyzerService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("crowdpulsed starting");

    let config = Config::load()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        bus = ?config.bus,
        preload = config.preload_models,
        "configuration loaded"
    );

    let store = store::ResultStore::open(&config.db_path)?;
    let engine = engine::spawn_engine(config.model_paths(), store, config.preload_models)?;

    let service = AnalyzerService::new(engine, config.include_crops, config.history_limit);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "crowdpulsed ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("crowdpulsed shutting down");

    Ok(())
}
