use std::path::PathBuf;

use clap::Parser;

use redis_gateway::config::{self, validation::validate_config, GatewayConfig};
use redis_gateway::lifecycle::startup;
use redis_gateway::observability::logging;

/// HTTP gateway to Redis.
#[derive(Debug, Parser)]
#[command(name = "redis-gateway", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `redis.url`.
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::read_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(url) = args.redis_url {
        config.redis.url = url;
    }

    logging::init_logging(&config.observability);
    validate_config(&config).map_err(config::ConfigError::Validation)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        acl_entries = config.acl.len(),
        "redis-gateway starting"
    );

    startup::run(config).await?;
    Ok(())
}
