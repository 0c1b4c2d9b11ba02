//! tickstream - Crypto.com market data runner

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Stream Crypto.com order books and candlesticks and log a running summary
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any WS connection
    tickstream_ws::init_crypto();

    let args = Args::parse();

    tickstream_telemetry::init_logging()?;

    info!("Starting tickstream v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TICKSTREAM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TICKSTREAM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = tickstream_cli::AppConfig::from_file(&config_path)?;
    info!(
        url = %config.connection.url,
        markets = config.markets.len(),
        "Configuration loaded"
    );

    let app = tickstream_cli::Application::new(config)?;
    app.run().await?;

    Ok(())
}
