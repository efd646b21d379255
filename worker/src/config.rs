use crate::errors::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub discovery: DiscoverySettings,
    pub dispatcher: DispatcherSettings,
    pub workload: WorkloadSettings,
    pub logging: LoggingConfig,
}

/// Discovery tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    pub port: u16,
    pub bind_attempts: u16,
    pub broadcast_addr: String,
    pub heartbeat_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub liveness_timeout_secs: u64,
}

/// Uplink to the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Gateway address, `host:port`. Empty string means wait for the
    /// dispatcher's server-info broadcast instead.
    pub address: String,
    pub status_interval_secs: u64,
    pub reconnect_backoff_secs: u64,
}

/// Simulated partition load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSettings {
    /// Progress added per step, percent
    pub load_step_percent: u8,
    pub load_step_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_format: String,
}

impl Config {
    /// Get default configuration file path: `~/.llamagrid/worker.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| WorkerError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".llamagrid").join("worker.toml"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Generate default configuration
    pub fn default() -> Self {
        Config {
            discovery: DiscoverySettings {
                port: 34399,
                bind_attempts: 8,
                broadcast_addr: "255.255.255.255:34399".to_string(),
                heartbeat_interval_secs: 5,
                cleanup_interval_secs: 5,
                liveness_timeout_secs: 15,
            },
            dispatcher: DispatcherSettings {
                address: String::new(),
                status_interval_secs: 5,
                reconnect_backoff_secs: 5,
            },
            workload: WorkloadSettings {
                load_step_percent: 25,
                load_step_interval_ms: 500,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.discovery
            .broadcast_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| WorkerError::Config(format!("Invalid broadcast address: {}", e)))?;

        if self.discovery.bind_attempts == 0 {
            return Err(WorkerError::Config(
                "bind_attempts must be at least 1".into(),
            ));
        }

        if self.discovery.heartbeat_interval_secs == 0 {
            return Err(WorkerError::Config(
                "heartbeat_interval_secs must be at least 1".into(),
            ));
        }

        if self.discovery.liveness_timeout_secs <= self.discovery.heartbeat_interval_secs {
            return Err(WorkerError::Config(
                "liveness_timeout_secs must exceed heartbeat_interval_secs".into(),
            ));
        }

        if self.workload.load_step_percent == 0 || self.workload.load_step_percent > 100 {
            return Err(WorkerError::Config(
                "load_step_percent must be between 1 and 100".into(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(WorkerError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        match self.logging.log_format.as_str() {
            "pretty" | "json" => {}
            _ => {
                return Err(WorkerError::Config(
                    "log_format must be 'pretty' or 'json'".into(),
                ))
            }
        }

        Ok(())
    }

    /// Save configuration to file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(
                    path = %parent.display(),
                    error = %e,
                    "Failed to create config directory"
                );
                e
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string).map_err(|e| {
            tracing::error!(
                path = %temp_path.display(),
                error = %e,
                "Failed to write temp config file"
            );
            e
        })?;

        std::fs::rename(&temp_path, path).map_err(|e| {
            tracing::error!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to rename temp config file"
            );
            e
        })?;

        tracing::info!(path = %path.display(), "Configuration saved successfully");
        Ok(())
    }
}
