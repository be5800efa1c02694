use anyhow::Result;
use tracing_subscriber::EnvFilter;

use mien_store::RosterStore;

mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("miend starting");

    let config = config::Config::load()?;
    tracing::info!(
        db_path = %config.db_path.display(),
        embedding_dim = config.embedding_dim,
        samples_per_enroll = config.samples_per_enroll,
        "configuration loaded"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = RosterStore::open(&config.db_path, config.embedding_dim)?;

    let seeded = store.seed(&config.roster)?;
    if seeded > 0 {
        tracing::info!(count = seeded, "roster seeded from configuration");
    }

    let engine = engine::spawn_engine(&config, store);
    let service = dbus_interface::MienService::new(engine);

    let builder = if config.use_system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name("org.freedesktop.Mien1")?
        .serve_at("/org/freedesktop/Mien1", service)?
        .build()
        .await?;

    tracing::info!("miend ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("miend shutting down");

    Ok(())
}
