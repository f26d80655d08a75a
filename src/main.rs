//! nodegate: control agent for a remotely managed proxy node.
//!
//! Initializes tracing, loads configuration from TOML plus environment
//! overrides, then hands off to the bootstrap sequence. Any startup failure
//! is logged and turned into a non-zero exit status here, and only here.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nodegate::config::{AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use nodegate::BootstrapError;

/// nodegate: bootstrap and control transport for a proxy node
#[derive(Parser, Debug)]
#[command(name = "nodegate", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level filter (e.g., "nodegate=debug")
    #[arg(short, long)]
    log_level: Option<String>,
}

fn init_tracing(log_filter: &str, json: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(log_filter));
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(args: &Args) -> Result<AppConfig, BootstrapError> {
    let path = args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let mut config = AppConfig::load_or_default(path, args.config.is_some())?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: CLI > env > default
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let config = load_config(&args);
    let json = config.as_ref().map(|c| c.logging.is_json()).unwrap_or(false);
    init_tracing(&log_filter, json);

    let result = match config {
        Ok(config) => {
            tracing::info!(
                host = %config.service.host,
                port = config.service.port,
                protocol = %config.service.protocol,
                "Loaded configuration"
            );
            nodegate::run(&config).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            tracing::info!("Node stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(kind = e.kind().as_str(), error = %e, "Node terminated with error");
            ExitCode::from(e.exit_code())
        }
    }
}
