//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError, DispatchingStrategy};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "gatekeeper.toml",
    "./config/config.toml",
    "./config/gatekeeper.toml",
    "/etc/gatekeeper/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        // Start with defaults
        let mut config = AppConfig::default();

        // Try to load from file
        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config)?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        // Check explicit path first
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        // Check GATEKEEPER_CONFIG env var
        if let Ok(path) = env::var("GATEKEEPER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // Search standard paths
        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        // Broker
        if let Ok(val) = env::var("GATEKEEPER_RABBITMQ_CONN") {
            config.broker.rabbit_mq_conn = val;
        }
        if let Ok(val) = env::var("GATEKEEPER_TASK_QUEUE_NAME") {
            config.broker.task_queue_name = val;
        }

        // Store
        if let Ok(val) = env::var("GATEKEEPER_MONGODB_CONN") {
            config.store.mongodb_conn = val;
        }
        if let Ok(val) = env::var("GATEKEEPER_MONGODB_DATABASE") {
            config.store.database = val;
        }

        // Cache
        if let Ok(val) = env::var("GATEKEEPER_REDIS_CONN") {
            config.cache.redis_conn = val;
        }
        if let Ok(val) = env::var("GATEKEEPER_DIVERGENCE_GRACE_MINUTES") {
            config.cache.divergence_grace_minutes = val
                .parse()
                .map_err(|_| ConfigError::EnvError("GATEKEEPER_DIVERGENCE_GRACE_MINUTES must be an integer".to_string()))?;
        }
        if let Ok(val) = env::var("GATEKEEPER_AGGREGATOR_INTERVAL_SECONDS") {
            config.cache.aggregator_interval_seconds = val
                .parse()
                .map_err(|_| ConfigError::EnvError("GATEKEEPER_AGGREGATOR_INTERVAL_SECONDS must be an integer".to_string()))?;
        }

        // Remote console
        if let Ok(val) = env::var("GATEKEEPER_RCON_SERVER") {
            config.rcon.rcon_server = val;
        }
        if let Ok(val) = env::var("GATEKEEPER_RCON_PORT") {
            config.rcon.rcon_port = val
                .parse()
                .map_err(|_| ConfigError::EnvError("GATEKEEPER_RCON_PORT must be a port number".to_string()))?;
        }
        if let Ok(val) = env::var("GATEKEEPER_RCON_PASSWORD") {
            config.rcon.rcon_password = val;
        }

        // Dispatch
        if let Ok(val) = env::var("GATEKEEPER_OPS") {
            config.dispatch.ops = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("GATEKEEPER_DISPATCHING_STRATEGY") {
            config.dispatch.dispatching_strategy = match val.to_lowercase().as_str() {
                "random" => DispatchingStrategy::Random,
                "broadcast" => DispatchingStrategy::Broadcast,
                other => {
                    return Err(ConfigError::EnvError(format!(
                        "GATEKEEPER_DISPATCHING_STRATEGY must be 'broadcast' or 'random', got '{other}'"
                    )))
                }
            };
        }
        if let Ok(val) = env::var("GATEKEEPER_RANDOM_DISPATCHING_THRESHOLD") {
            config.dispatch.random_dispatching_threshold = val
                .parse()
                .map_err(|_| ConfigError::EnvError("GATEKEEPER_RANDOM_DISPATCHING_THRESHOLD must be an integer".to_string()))?;
        }
        if let Ok(val) = env::var("GATEKEEPER_MIN_REQUIRED_RECEIVER") {
            config.dispatch.min_required_receiver = val
                .parse()
                .map_err(|_| ConfigError::EnvError("GATEKEEPER_MIN_REQUIRED_RECEIVER must be an integer".to_string()))?;
        }

        // Mail
        if let Ok(val) = env::var("GATEKEEPER_SMTP_SERVER") {
            config.mail.smtp_server = val;
        }
        if let Ok(val) = env::var("GATEKEEPER_SMTP_PORT") {
            config.mail.smtp_port = val
                .parse()
                .map_err(|_| ConfigError::EnvError("GATEKEEPER_SMTP_PORT must be a port number".to_string()))?;
        }
        if let Ok(val) = env::var("GATEKEEPER_SMTP_EMAIL") {
            config.mail.smtp_email = val;
        }
        if let Ok(val) = env::var("GATEKEEPER_SMTP_PASSWORD") {
            config.mail.smtp_password = val;
        }

        // Token codec
        if let Ok(val) = env::var("GATEKEEPER_PASSPHRASE") {
            config.token.passphrase = val;
        }

        // HTTP
        if let Ok(val) = env::var("GATEKEEPER_HTTP_PORT") {
            config.http.port = val
                .parse()
                .map_err(|_| ConfigError::EnvError("GATEKEEPER_HTTP_PORT must be a port number".to_string()))?;
        }
        if let Ok(val) = env::var("GATEKEEPER_HTTP_HOST") {
            config.http.host = val;
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_env_vars_leave_defaults_untouched() {
        let loader = ConfigLoader::new();
        let mut config = AppConfig::default();
        loader.apply_env_overrides(&mut config).unwrap();
        assert_eq!(config.http.port, 8080);
    }
}
