use anyhow::Result;
use std::{env, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use plant_sync::config::{self, Config};
use plant_sync::engine::Engine;
use plant_sync::mqtt::MqttStore;
use plant_sync::state::DashboardState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = if std::path::Path::new(&config_path).exists() {
        config::load(&config_path)?
    } else {
        info!(path = %config_path, "no config file found, using defaults");
        Config::default()
    };

    // ── Store + engine ──────────────────────────────────────────────
    let store = Arc::new(MqttStore::connect(&cfg.store));
    let shared = DashboardState::shared();
    let engine = Engine::start(store, Arc::clone(&shared)).await?;

    info!(
        host = %cfg.store.host,
        port = cfg.store.port,
        "plant-sync running, ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await?;
    engine.shutdown();
    Ok(())
}
