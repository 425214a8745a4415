use anyhow::{Context, Result};
use clap::Parser;
use linkbroker::config::Config;
use linkbroker::directory::HttpDirectoryClient;
use linkbroker::{gateway, store};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "linkbroker", version, about = "Device-link broker service")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml", env = "LINKBROKER_CONFIG")]
    config: PathBuf,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let store = store::create_store(&config)?;
    store
        .ensure_ready()
        .await
        .context("preparing record store")?;

    let directory = Arc::new(
        HttpDirectoryClient::new(&config.directory).context("building directory client")?,
    );

    let host = cli.host.as_deref().unwrap_or(&config.gateway.host);
    let port = cli.port.unwrap_or(config.gateway.port);
    gateway::run_gateway(host, port, &config, store, directory).await
}
