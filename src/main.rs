use anyhow::{Context, Result};

use coopctl::bus::EventBus;
use coopctl::cli::Cli;
use coopctl::config::{ConfigSnapshot, ConfigStore};
use coopctl::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    let snapshot = ConfigSnapshot::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    snapshot
        .validate()
        .context("configuration failed validation")?;
    let bus = EventBus::new();
    let config = ConfigStore::new(snapshot, bus.clone());

    let supervisor = Supervisor::boot(config, bus, cli.simulate).await;

    let shutdown = tokio::sync::Notify::new();
    let shutdown = std::sync::Arc::new(shutdown);
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_shutdown.notify_waiters();
    })
    .context("installing SIGTERM/SIGINT handler")?;

    log::info!("coopctl: running, press ctrl-c to stop");
    shutdown.notified().await;

    supervisor.shutdown();
    log::info!("coopctl: shutdown complete");
    Ok(())
}
