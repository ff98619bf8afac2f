//! CLI argument definitions for the keyturn binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use keyturn_core::config::KeyturnConfig;

pub const CONFIG_ENV_VAR: &str = "KEYTURN_CONFIG";
pub const PORT_ENV_VAR: &str = "KEYTURN_PORT";

/// keyturn - single-use account action tokens.
#[derive(Parser, Debug)]
#[command(name = "keyturn", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// SQLite database file.
    #[arg(short = 'd', long = "db", global = true)]
    pub db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Create a token and print its key and landing link.
    Issue {
        #[arg(long)]
        email: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        /// Content type of the target object, e.g. "user".
        #[arg(long, requires = "target_id")]
        target_type: Option<String>,
        #[arg(long, requires = "target_type")]
        target_id: Option<i64>,
    },
    /// List tokens, newest first.
    List {
        #[arg(long)]
        action: Option<String>,
        /// Only tokens that can still be consumed.
        #[arg(long)]
        pending: bool,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    /// Cancel tokens by key.
    Cancel {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Lift the cancellation of tokens by key.
    Uncancel {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > KEYTURN_CONFIG env var > ~/.keyturn/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.config_path_from(std::env::var(CONFIG_ENV_VAR).ok())
    }

    fn config_path_from(&self, env_value: Option<String>) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env_value.filter(|p| !p.is_empty()) {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > KEYTURN_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.port_from(std::env::var(PORT_ENV_VAR).ok(), config_port)
    }

    fn port_from(&self, env_value: Option<String>, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        env_value
            .and_then(|val| val.parse::<u16>().ok())
            .unwrap_or(config_port)
    }

    /// Fold CLI and environment overrides into a loaded config.
    pub fn apply_to(&self, config: &mut KeyturnConfig) {
        config.general.port = self.resolve_port(config.general.port);
        if let Some(ref db) = self.db {
            config.general.db_path = db.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        Some(rest) => home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(rest)),
        None => PathBuf::from(path),
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    home_dir()
        .map(|home| home.join(".keyturn").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}
