use anyhow::Result;
use firmware_runner::config::RunnerConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting firmware build runner");

    let config = RunnerConfig::from_env();
    info!("Firmware cache at {:?}", config.cache_dir);

    firmware_runner::server::run_server(config).await?;

    Ok(())
}
