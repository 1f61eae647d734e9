pub mod calibrate;
pub mod config_cmd;
pub mod serve;
pub mod user;

use rolodex_core::{Config, Paths};
use rolodex_storage::{CredentialHasher, HashParams, SqliteDatabase};
use std::path::PathBuf;
use tracing::warn;

/// Configuration shared by all commands, resolved once from file, env and flags.
pub struct Context {
    pub paths: Paths,
    pub config_path: PathBuf,
    pub config: Config,
}

impl Context {
    pub fn load(config_path: Option<PathBuf>, database: Option<String>) -> anyhow::Result<Self> {
        let paths = Paths::new();
        let config_path = config_path.unwrap_or_else(|| paths.config_file());
        let mut config = Config::load_or_default(&config_path)?;

        config.apply_env_overrides();
        if let Some(ds) = database {
            config.database.data_source = ds;
        }
        config.validate()?;

        Ok(Self {
            paths,
            config_path,
            config,
        })
    }

    pub fn data_source(&self) -> String {
        self.config.data_source(&self.paths)
    }

    /// Hasher for this process: weak parameters when configured, otherwise
    /// calibrated against `auth.hashTargetMs`. Commands that never hash a
    /// password pass `hashing = false` and skip calibration.
    pub async fn hasher(&self, hashing: bool) -> anyhow::Result<CredentialHasher> {
        if !hashing {
            return Ok(CredentialHasher::weak());
        }
        if self.config.auth.weak_password_hash {
            warn!("Using weak password hash parameters");
            return Ok(CredentialHasher::weak());
        }

        let target = self.config.hash_target();
        let params = tokio::task::spawn_blocking(move || HashParams::calibrate(target)).await??;
        Ok(CredentialHasher::new(params)?)
    }

    pub async fn open_database(&self, hashing: bool) -> anyhow::Result<SqliteDatabase> {
        let hasher = self.hasher(hashing).await?;
        Ok(SqliteDatabase::open(&self.data_source(), hasher)?)
    }
}
