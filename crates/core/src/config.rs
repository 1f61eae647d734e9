use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Environment variable overriding `database.dataSource`.
pub const ENV_DATABASE: &str = "ROLODEX_DB";
/// Environment variable enabling debug logging.
pub const ENV_DEBUG: &str = "ROLODEX_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// SQLite path or `:memory:`. Empty means `~/.rolodex/rolodex.db`.
    #[serde(default)]
    pub data_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Use deliberately weak password hash parameters. Tests only.
    #[serde(default)]
    pub weak_password_hash: bool,
    /// Wall-clock cost one password hash should take on this host.
    #[serde(default = "default_hash_target_ms")]
    pub hash_target_ms: u64,
}

fn default_hash_target_ms() -> u64 {
    500
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            weak_password_hash: false,
            hash_target_ms: default_hash_target_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_public_dir")]
    pub public_dir: String,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_public_dir() -> String {
    "public".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            public_dir: default_public_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load `path`, or fall back to defaults when no file exists there.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `ROLODEX_DB` / `ROLODEX_DEBUG` on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_DATABASE).ok(),
            std::env::var(ENV_DEBUG).ok(),
        );
    }

    fn apply_overrides(&mut self, database: Option<String>, debug: Option<String>) {
        if let Some(ds) = database.filter(|v| !v.is_empty()) {
            self.database.data_source = ds;
        }
        if let Some(flag) = debug {
            self.debug = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sessions.ttl_secs == 0 {
            return Err(Error::Config("sessions.ttlSecs must be positive".to_string()));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "sessions.sweepIntervalSecs must be positive".to_string(),
            ));
        }
        if self.auth.hash_target_ms == 0 {
            return Err(Error::Config("auth.hashTargetMs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn data_source(&self, paths: &Paths) -> String {
        if self.database.data_source.is_empty() {
            paths.database_file().to_string_lossy().into_owned()
        } else {
            self.database.data_source.clone()
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.sessions.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs)
    }

    pub fn hash_target(&self) -> Duration {
        Duration::from_millis(self.auth.hash_target_ms)
    }
}
