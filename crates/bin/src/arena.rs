//! Arena - stake arena game server binary

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Stake Arena v{}", env!("CARGO_PKG_VERSION"));

    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  World: {}x{}", config.world.width, config.world.height);
    info!(
        "  Ticks: {} Hz simulation, {} Hz broadcast, {} ms upkeep",
        config.server.fast_tick_hz, config.server.broadcast_rate, config.server.slow_tick_ms
    );
    info!("  Lobbies are created on first join");

    server::run(config).await?;

    Ok(())
}
