//! Configuration management.
//!
//! Configuration comes from `~/.config/parapet/config.toml`, overridden by
//! `PARAPET_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// parapet configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cloudsync: CloudSyncConfig,

    #[serde(default)]
    pub apps: AppConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

fn default_port() -> u16 {
    5001
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Cloud-sync endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSyncConfig {
    #[serde(default = "default_cloudsync_url")]
    pub url: String,

    /// Bearer key presented on outbound sync calls.
    #[serde(default)]
    pub api_key: String,
}

impl Default for CloudSyncConfig {
    fn default() -> Self {
        Self {
            url: default_cloudsync_url(),
            api_key: String::new(),
        }
    }
}

fn default_cloudsync_url() -> String {
    "https://sync.parapet.dev".to_string()
}

/// App-definition handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Folder watched for hot-reloaded app definitions. Consumed by the
    /// app registry, which is outside the control plane core.
    #[serde(default)]
    pub hotload_folder: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location plus env overrides.
    pub fn load() -> Self {
        let mut config = Self::default();

        let path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Data directory for the default database location.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("parapet"))
            .unwrap_or_else(|| PathBuf::from(".parapet"))
    }

    /// Config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("parapet"))
            .unwrap_or_else(|| PathBuf::from(".parapet"))
    }

    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("parapet.db"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PARAPET_SERVER_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Ok(host) = std::env::var("PARAPET_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(path) = std::env::var("PARAPET_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Ok(url) = std::env::var("PARAPET_CLOUDSYNC_URL") {
            self.cloudsync.url = url;
        }
        if let Ok(key) = std::env::var("PARAPET_CLOUDSYNC_APIKEY") {
            self.cloudsync.api_key = key;
        }
        if let Ok(folder) = std::env::var("PARAPET_APP_HOTLOAD_FOLDER") {
            self.apps.hotload_folder = Some(PathBuf::from(folder));
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(server) = partial.server {
            self.server = server;
        }
        if let Some(storage) = partial.storage {
            self.storage = storage;
        }
        if let Some(cloudsync) = partial.cloudsync {
            self.cloudsync = cloudsync;
        }
        if let Some(apps) = partial.apps {
            self.apps = apps;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    server: Option<ServerConfig>,
    storage: Option<StorageConfig>,
    cloudsync: Option<CloudSyncConfig>,
    apps: Option<AppConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let partial: PartialConfig = toml::from_str(
            r#"
            [server]
            port = 9001
            host = "0.0.0.0"
            "#,
        )
        .unwrap();
        let mut config = Config::default();
        config.apply_partial(partial);
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "0.0.0.0");
        // Untouched sections keep their defaults.
        assert_eq!(config.cloudsync.url, "https://sync.parapet.dev");
    }
}
