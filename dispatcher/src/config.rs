use crate::errors::{DispatcherError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub api: ApiConfig,
    pub dispatch: DispatchConfig,
    pub discovery: DiscoverySettings,
    pub logging: LoggingConfig,
}

/// Worker gateway (persistent connections)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub port: u16,
    pub ping_interval_secs: u64,
}

/// Client-facing HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

/// Request routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub request_timeout_secs: u64,
}

/// The dispatcher's own discovery instance, used to announce the gateway
/// address to the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    pub enabled: bool,
    pub port: u16,
    pub bind_attempts: u16,
    pub broadcast_addr: String,
    /// Address workers should dial for the gateway, announced via server-info
    pub advertise_addr: String,
    pub heartbeat_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub liveness_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_format: String,
}

impl Config {
    /// Get default configuration file path: `~/.llamagrid/dispatcher.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| DispatcherError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".llamagrid").join("dispatcher.toml"))
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
            gateway: GatewayConfig {
                port: 9010,
                ping_interval_secs: 30,
            },
            api: ApiConfig { port: 8080 },
            dispatch: DispatchConfig {
                request_timeout_secs: 30,
            },
            discovery: DiscoverySettings {
                enabled: true,
                port: 34399,
                bind_attempts: 8,
                broadcast_addr: "255.255.255.255:34399".to_string(),
                advertise_addr: "127.0.0.1".to_string(),
                heartbeat_interval_secs: 5,
                cleanup_interval_secs: 5,
                liveness_timeout_secs: 15,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.gateway.port == self.api.port {
            return Err(DispatcherError::Config(
                "gateway and API ports must differ".into(),
            ));
        }

        if self.gateway.ping_interval_secs == 0 {
            return Err(DispatcherError::Config(
                "ping_interval_secs must be at least 1".into(),
            ));
        }

        if self.dispatch.request_timeout_secs == 0 {
            return Err(DispatcherError::Config(
                "request_timeout_secs must be at least 1".into(),
            ));
        }

        self.discovery
            .broadcast_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| DispatcherError::Config(format!("Invalid broadcast address: {}", e)))?;

        if self.discovery.advertise_addr.is_empty() {
            return Err(DispatcherError::Config(
                "advertise_addr must not be empty".into(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(DispatcherError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        match self.logging.log_format.as_str() {
            "pretty" | "json" => {}
            _ => {
                return Err(DispatcherError::Config(
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.gateway.port, 9010);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.dispatch.request_timeout_secs, 30);
        assert!(config.discovery.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_collision_rejected() {
        let mut config = Config::default();
        config.api.port = config.gateway.port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.dispatch.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_broadcast_addr() {
        let mut config = Config::default();
        config.discovery.broadcast_addr = "nope".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("dispatcher.toml");

        let original = Config::default();
        original.save(&config_path).expect("save should succeed");
        assert!(config_path.exists());

        let loaded = Config::load(&config_path).expect("load should succeed");
        assert_eq!(original.gateway.port, loaded.gateway.port);
        assert_eq!(
            original.dispatch.request_timeout_secs,
            loaded.dispatch.request_timeout_secs
        );
        assert_eq!(original.discovery.advertise_addr, loaded.discovery.advertise_addr);
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("dispatcher.toml");

        let config = Config::default();
        config.save(&config_path).unwrap();

        let temp_path = config_path.with_extension("toml.tmp");
        assert!(!temp_path.exists(), "Temp file should be cleaned up");
    }

    #[test]
    fn test_default_path() {
        let path = Config::default_path().unwrap();
        assert!(path.to_string_lossy().contains(".llamagrid"));
        assert!(path.to_string_lossy().ends_with("dispatcher.toml"));
    }
}
