use clap::Parser;
use llamagrid_dispatcher::{announce, api, AppState, Config, Gateway, Result};
use tokio::signal;
use tokio::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// LlamaGrid Dispatcher - routes inference requests to cluster workers
#[derive(Parser, Debug)]
#[command(name = "llamagrid-dispatcher")]
#[command(about = "LlamaGrid dispatcher: worker registry and inference routing")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.llamagrid/dispatcher.toml")]
    config: String,

    /// Override HTTP API port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Override worker gateway port (overrides config file)
    #[arg(short, long)]
    gateway_port: Option<u16>,

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
        println!("\nEdit the configuration file and then start the dispatcher with:");
        println!("  llamagrid-dispatcher --config {}", cli.config);
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
        println!(
            "Edit {} to customize dispatcher settings\n",
            config_path.display()
        );

        config
    };

    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(port) = cli.gateway_port {
        config.gateway.port = port;
    }
    config.validate()?;

    setup_logging(&config, cli.log_level.as_deref());

    tracing::info!("Starting LlamaGrid dispatcher");
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Version");
    tracing::info!(
        gateway_port = config.gateway.port,
        api_port = config.api.port,
        request_timeout_secs = config.dispatch.request_timeout_secs,
        "Dispatcher configuration"
    );

    let state = AppState::new(Duration::from_secs(config.dispatch.request_timeout_secs));

    // Worker gateway
    let gateway_addr = format!("0.0.0.0:{}", config.gateway.port);
    let gateway_listener = tokio::net::TcpListener::bind(&gateway_addr).await?;
    let gateway = Gateway::new(
        state.registry.clone(),
        state.pending.clone(),
        Duration::from_secs(config.gateway.ping_interval_secs),
    );
    tokio::spawn(async move {
        if let Err(e) = gateway.run(gateway_listener).await {
            tracing::error!(error = %e, "Worker gateway stopped");
        }
    });

    // Server-info announcer over the discovery mesh
    if config.discovery.enabled {
        let dc = announce::discovery_config(&config.discovery)?;
        let (mut discovery, events) = llamagrid_cluster::DiscoveryService::new(dc);
        match discovery.start().await {
            Ok(()) => {
                let advertise = config.discovery.advertise_addr.clone();
                let gateway_port = config.gateway.port;
                tokio::spawn(async move {
                    announce::run_announcer(discovery, events, advertise, gateway_port).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discovery announcer disabled, workers need a configured address");
            }
        }
    }

    // HTTP API with port fallback search
    let app = api::create_router(state);
    let addr = format!("0.0.0.0:{}", config.api.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            tracing::info!(address = %addr, "Dispatcher API listening");
            listener
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::info!(port = config.api.port, "Port already in use, searching for available port...");

            let mut found = None;
            for try_port in (config.api.port + 1)..(config.api.port + 100) {
                let try_addr = format!("0.0.0.0:{}", try_port);
                if let Ok(listener) = tokio::net::TcpListener::bind(&try_addr).await {
                    tracing::info!(address = %try_addr, "Dispatcher API listening on alternative port");
                    println!(
                        "\nPort {} was in use. Using port {} instead.",
                        config.api.port, try_port
                    );
                    found = Some(listener);
                    break;
                }
            }

            found.ok_or_else(|| {
                llamagrid_dispatcher::DispatcherError::Config(format!(
                    "Could not find available port in range {}-{}",
                    config.api.port,
                    config.api.port + 100
                ))
            })?
        }
        Err(e) => return Err(e.into()),
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Dispatcher shut down");
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

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }
}
