//! feishubot - Main entry point.

use anyhow::Result;
use feishubot::start_server;
use feishubot_common::config::{config_path, Config};
use feishubot_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration: file, then environment
    let config = Config::load_with_env()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("feishubot v{}", env!("CARGO_PKG_VERSION"));

    let path = config_path();
    if path.exists() {
        tracing::info!(path = %path.display(), "Loaded config file");
    } else {
        tracing::info!(path = %path.display(), "Config file not found, using defaults");
    }

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    start_server(&config).await
}
