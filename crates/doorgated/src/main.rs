use anyhow::Result;
use doorgate_core::{Embedder, FaceStore, OnnxEmbedder, SessionController};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{GateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        models = %config.model_dir.display(),
        threshold = config.match_threshold,
        metric = config.distance_metric.as_str(),
        "doorgated starting"
    );

    // A corrupt store degrades to an empty one; missing models are fatal.
    let store = FaceStore::open_or_recover(&config.db_path);
    let embedder: Box<dyn Embedder> = Box::new(OnnxEmbedder::load(&config.model_dir)?);

    let controller = Arc::new(SessionController::new(store, embedder, config.session_config()));
    let engine = engine::spawn_engine(controller, config.capture_timeout())?;

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, GateService::new(engine))?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, session_bus = config.session_bus, "doorgated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("doorgated shutting down");

    Ok(())
}
