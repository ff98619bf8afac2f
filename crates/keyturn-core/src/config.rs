use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{KeyturnError, Result};

/// Environment variable overriding `tokens.validity_duration_days`.
pub const VALIDITY_ENV_VAR: &str = "ACTION_TOKEN_VALIDITY_DURATION";

/// Upper bound for `tokens.validity_duration_days` (about a century).
pub const MAX_VALIDITY_DAYS: u32 = 36_500;

/// Top-level configuration for Keyturn.
///
/// Loaded from `~/.keyturn/config.toml` by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyturnConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
}

impl KeyturnConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KeyturnConfig = toml::from_str(&content)?;
        config.tokens.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| KeyturnError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using `lookup` as the variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(VALIDITY_ENV_VAR) {
            let days = raw.trim().parse::<u32>().map_err(|e| {
                KeyturnError::Config(format!("{} must be a number of days: {}", VALIDITY_ENV_VAR, e))
            })?;
            TokenConfig {
                validity_duration_days: days,
            }
            .validate()
            .map_err(|e| KeyturnError::Config(format!("{}: {}", VALIDITY_ENV_VAR, e)))?;
            self.tokens.validity_duration_days = days;
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// SQLite database file.
    pub db_path: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
    /// Base URL used when building landing links in notifications.
    pub public_url: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.keyturn/keyturn.db".to_string(),
            log_level: "info".to_string(),
            port: 3040,
            public_url: "http://127.0.0.1:3040".to_string(),
        }
    }
}

/// Account action token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Number of days a token stays valid after its creation.
    pub validity_duration_days: u32,
}

impl TokenConfig {
    /// Reject validity windows too large for date arithmetic.
    pub fn validate(&self) -> Result<()> {
        if self.validity_duration_days > MAX_VALIDITY_DAYS {
            return Err(KeyturnError::Config(format!(
                "validity_duration_days must be at most {}, got {}",
                MAX_VALIDITY_DAYS, self.validity_duration_days
            )));
        }
        Ok(())
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            validity_duration_days: 2,
        }
    }
}
