// Configuration management for the murmur CLI
//
// Cross-platform config stored in:
// - Linux: ~/.config/murmur/config.json
// - macOS: ~/Library/Application Support/murmur/config.json
// - Windows: %APPDATA%\murmur\config.json

use anyhow::{Context, Result};
use murmur_core::{ClientConfig, Presence, ServerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings for `murmur serve`
    pub server: ServerSection,

    /// Client settings for `murmur connect`
    pub client: ClientSection,

    /// Target used to discover the outward address
    pub probe_target: String,

    /// User database location (defaults to the data directory)
    pub storage_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_host: String,
    pub port: u16,
    pub max_connections: usize,
    pub history_capacity: usize,
    /// Seconds between keep-alive broadcasts
    pub keep_alive_secs: u64,
    /// Pause after a failed accept, in milliseconds
    pub accept_backoff_ms: u64,
    /// Per-peer write timeout, in seconds
    pub send_timeout_secs: u64,
    pub operator_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub host: String,
    pub port: u16,
    pub name: Option<String>,
    pub presence: Option<Presence>,
    pub send_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let core = ServerConfig::default();
        Self {
            server: ServerSection::default(),
            client: ClientSection::default(),
            probe_target: core.probe_target,
            storage_path: None,
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        let core = ServerConfig::default();
        Self {
            bind_host: core.bind_host,
            port: 7000,
            max_connections: core.max_connections,
            history_capacity: core.history_capacity,
            keep_alive_secs: core.keep_alive_interval.as_secs(),
            accept_backoff_ms: core.accept_backoff.as_millis() as u64,
            send_timeout_secs: core.send_timeout.as_secs(),
            operator_name: core.operator_name,
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7000,
            name: None,
            presence: None,
            send_timeout_secs: ServerConfig::default().send_timeout.as_secs(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("murmur");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("murmur");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Where the user database lives
    pub fn users_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("users")),
        }
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value (call `save` afterwards)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server.bind_host" => self.server.bind_host = value.to_string(),
            "server.port" => self.server.port = value.parse().context("Invalid port number")?,
            "server.max_connections" => {
                self.server.max_connections = value.parse().context("Invalid number")?
            }
            "server.history_capacity" => {
                self.server.history_capacity = value.parse().context("Invalid number")?
            }
            "server.keep_alive_secs" => {
                self.server.keep_alive_secs = value.parse().context("Invalid number")?
            }
            "server.accept_backoff_ms" => {
                self.server.accept_backoff_ms = value.parse().context("Invalid number")?
            }
            "server.send_timeout_secs" => {
                self.server.send_timeout_secs = value.parse().context("Invalid number")?
            }
            "server.operator_name" => self.server.operator_name = value.to_string(),
            "client.host" => self.client.host = value.to_string(),
            "client.port" => self.client.port = value.parse().context("Invalid port number")?,
            "client.name" => {
                self.client.name = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "client.presence" => {
                self.client.presence = Presence::parse_optional(value)?;
            }
            "client.send_timeout_secs" => {
                self.client.send_timeout_secs = value.parse().context("Invalid number")?
            }
            "probe_target" => self.probe_target = value.to_string(),
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("server.bind_host".to_string(), self.server.bind_host.clone()),
            ("server.port".to_string(), self.server.port.to_string()),
            ("server.max_connections".to_string(), self.server.max_connections.to_string()),
            ("server.history_capacity".to_string(), self.server.history_capacity.to_string()),
            ("server.keep_alive_secs".to_string(), self.server.keep_alive_secs.to_string()),
            ("server.accept_backoff_ms".to_string(), self.server.accept_backoff_ms.to_string()),
            ("server.send_timeout_secs".to_string(), self.server.send_timeout_secs.to_string()),
            ("server.operator_name".to_string(), self.server.operator_name.clone()),
            ("client.host".to_string(), self.client.host.clone()),
            ("client.port".to_string(), self.client.port.to_string()),
            ("client.name".to_string(), self.client.name.clone().unwrap_or_else(|| "(unset)".to_string())),
            ("client.presence".to_string(), Presence::label_or_dash(self.client.presence).to_string()),
            ("client.send_timeout_secs".to_string(), self.client.send_timeout_secs.to_string()),
            ("probe_target".to_string(), self.probe_target.clone()),
            ("storage_path".to_string(), self.storage_path.clone().unwrap_or_else(|| "(auto)".to_string())),
        ]
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_host: self.server.bind_host.clone(),
            max_connections: self.server.max_connections,
            history_capacity: self.server.history_capacity,
            keep_alive_interval: Duration::from_secs(self.server.keep_alive_secs),
            accept_backoff: Duration::from_millis(self.server.accept_backoff_ms),
            send_timeout: Duration::from_secs(self.server.send_timeout_secs),
            operator_name: self.server.operator_name.clone(),
            probe_target: self.probe_target.clone(),
        }
    }

    pub fn client_config(&self, name: &str, credential: &str) -> ClientConfig {
        ClientConfig {
            send_timeout: Duration::from_secs(self.client.send_timeout_secs),
            probe_target: self.probe_target.clone(),
            ..ClientConfig::new(self.client.host.clone(), self.client.port, name, credential)
        }
    }
}
