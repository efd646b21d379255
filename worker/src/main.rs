use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod engine;
mod errors;
mod model;
mod resources;
mod uplink;
mod worker;

use config::Config;
use errors::Result;
use resources::SysinfoSampler;
use worker::Worker;

/// LlamaGrid Worker - cluster member hosting a partition of the workload
#[derive(Parser, Debug)]
#[command(name = "llamagrid-worker")]
#[command(about = "LlamaGrid worker node: discovery, partition hosting, inference execution")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.llamagrid/worker.toml")]
    config: String,

    /// Override dispatcher gateway address (host:port)
    #[arg(short, long)]
    dispatcher: Option<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Generate default config and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        let config = Config::default();
        let path = shellexpand::tilde(&cli.config);
        let path = std::path::Path::new(path.as_ref());

        config.save(path)?;
        println!("Generated default configuration at: {}", path.display());
        println!("\nEdit the configuration file and then start the worker with:");
        println!("  llamagrid-worker --config {}", cli.config);
        return Ok(());
    }

    let config_path = shellexpand::tilde(&cli.config);
    let config_path = std::path::Path::new(config_path.as_ref());

    let mut config = if config_path.exists() {
        Config::load(config_path)?
    } else {
        // Auto-generate default config on first run
        let config = Config::default();
        config.save(config_path)?;

        println!(
            "First run detected - created default configuration at: {}",
            config_path.display()
        );
        println!("Edit {} to customize worker settings\n", config_path.display());

        config
    };

    setup_logging(&config, cli.log_level.as_deref());

    if let Some(addr) = cli.dispatcher {
        tracing::info!(addr = %addr, "Dispatcher address overridden via CLI argument");
        config.dispatcher.address = addr;
    }

    tracing::info!("Starting LlamaGrid worker");
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Version");
    tracing::info!(
        discovery_port = config.discovery.port,
        broadcast = %config.discovery.broadcast_addr,
        heartbeat_secs = config.discovery.heartbeat_interval_secs,
        "Discovery configuration"
    );

    let hostname = SysinfoSampler::hostname();
    let worker = Worker::new(config, hostname, Box::new(SysinfoSampler::new()));
    tracing::info!(node_id = %worker.node_id(), "Worker ready");

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker stopped with error");
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Received shutdown signal (Ctrl+C)");
            println!("\nShutting down worker...");
        }
    }

    tracing::info!("Worker stopped");
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(config: &Config, log_level_override: Option<&str>) {
    let log_level = log_level_override.unwrap_or(&config.logging.level);

    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
}
