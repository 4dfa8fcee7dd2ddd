//! Layered configuration loading.
//!
//! Precedence, lowest to highest: programmatic defaults, `.caw/config.json`,
//! `CAW_*` environment variables, CLI flags. Unknown top-level keys in the
//! config file are ignored with a warning.

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::models::config::KNOWN_CONFIG_KEYS;
use crate::domain::models::{CawConfig, DbMode, Transport};

/// Config file location relative to the working directory.
pub const CONFIG_FILE: &str = ".caw/config.json";

/// Database file name under the `.caw` directory.
pub const DB_FILE: &str = "workflows.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port: {0}. Must be between 1 and 65535")]
    InvalidPort(u32),

    #[error("Transport is http but no port is configured")]
    MissingPort,

    #[error("Agent runtime cannot be empty")]
    EmptyRuntime,

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

/// CLI-level overrides applied on top of file and environment layers.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub transport: Option<Transport>,
    pub port: Option<u16>,
    pub db_mode: Option<DbMode>,
    pub repo_path: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the default file location plus the environment.
    pub fn load(overrides: &CliOverrides) -> Result<CawConfig, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE), overrides)
    }

    /// Load from a specific file path plus the environment.
    pub fn load_from(path: &Path, overrides: &CliOverrides) -> Result<CawConfig, ConfigError> {
        warn_unknown_keys(path);

        let mut config: CawConfig = Figment::new()
            .merge(Serialized::defaults(CawConfig::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed("CAW_"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        if let Some(transport) = overrides.transport {
            config.transport = transport;
        }
        if let Some(port) = overrides.port {
            config.port = Some(port);
        }
        if let Some(db_mode) = overrides.db_mode {
            config.db_mode = db_mode;
        }
        if let Some(repo_path) = &overrides.repo_path {
            config.repo_path = Some(repo_path.clone());
        }

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &CawConfig) -> Result<(), ConfigError> {
        if config.transport == Transport::Http && config.port.is_none() {
            return Err(ConfigError::MissingPort);
        }
        if let Some(port) = config.port {
            if port == 0 {
                return Err(ConfigError::InvalidPort(u32::from(port)));
            }
        }
        if config.agent.runtime.trim().is_empty() {
            return Err(ConfigError::EmptyRuntime);
        }
        Ok(())
    }
}

/// Where the store lives for this configuration.
pub fn database_path(config: &CawConfig) -> PathBuf {
    match config.db_mode {
        DbMode::Global => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            Path::new(&home).join(".caw").join(DB_FILE)
        }
        DbMode::PerRepo => {
            let root = config.repo_path.clone().unwrap_or_else(|| ".".to_string());
            Path::new(&root).join(".caw").join(DB_FILE)
        }
    }
}

/// The sqlx URL for the configured database.
pub fn database_url(config: &CawConfig) -> String {
    format!("sqlite:{}", database_path(config).display())
}

fn warn_unknown_keys(path: &Path) {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return;
    };
    if let Some(object) = value.as_object() {
        for key in object.keys() {
            if !KNOWN_CONFIG_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, file = %path.display(), "ignoring unknown config key");
            }
        }
    }
}
