//! Configuration for MySQL MCP Server
//!
//! Every setting is a command-line flag with an environment-variable
//! fallback, so the server can be configured entirely from its environment.
//! A `.env` file in the working directory is read first; variables already
//! set in the environment win over it.

use clap::{builder::BoolishValueParser, error::ErrorKind, ArgAction, Parser};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors, raised before anything is started
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("SSH private key file not found at {0}")]
    KeyNotFound(PathBuf),

    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("Failed to read .env file: {0}")]
    EnvFile(String),
}

/// Raw command-line / environment input
#[derive(Debug, Clone, Parser)]
#[command(
    name = "mysql-mcp",
    version,
    about = "MCP server exposing MySQL schema resources and read-only queries"
)]
pub struct Cli {
    /// Database host (the remote host as seen from the bastion when tunneling)
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    #[arg(long, env = "DB_PORT", default_value_t = 3306)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "DB_PASS", hide_env_values = true)]
    pub db_pass: Option<String>,

    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Maximum number of pooled connections
    #[arg(long, env = "DB_CONNECTION_LIMIT", default_value_t = 10)]
    pub db_connection_limit: u32,

    #[arg(long, env = "DB_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub db_connect_timeout_secs: u64,

    /// Per-statement execution limit for the query tool (0 disables it)
    #[arg(long, env = "QUERY_TIMEOUT_SECS", default_value_t = 30)]
    pub query_timeout_secs: u64,

    /// Reach the database through an SSH local forward
    #[arg(
        long,
        env = "USE_SSH_TUNNEL",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub use_ssh_tunnel: bool,

    #[arg(long, env = "SSH_BASTION_HOST")]
    pub ssh_bastion_host: Option<String>,

    #[arg(long, env = "SSH_BASTION_PORT", default_value_t = 22)]
    pub ssh_bastion_port: u16,

    #[arg(long, env = "SSH_BASTION_USER")]
    pub ssh_bastion_user: Option<String>,

    #[arg(long, env = "SSH_PRIVATE_KEY_PATH")]
    pub ssh_private_key_path: Option<PathBuf>,

    #[arg(long, env = "SSH_PRIVATE_KEY_PASSPHRASE", hide_env_values = true)]
    pub ssh_private_key_passphrase: Option<String>,

    /// Local end of the SSH forward
    #[arg(long, env = "LOCAL_PORT", default_value_t = 3333)]
    pub local_port: u16,
}

/// A string that never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Validated server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Present only when tunneling is enabled
    pub tunnel: Option<TunnelConfig>,
    /// `None` means statements run without a time limit
    pub query_timeout: Option<Duration>,
}

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub name: String,
    pub connection_limit: u32,
    pub connect_timeout: Duration,
}

/// SSH local-forward configuration
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub bastion_host: String,
    pub bastion_port: u16,
    pub bastion_user: String,
    pub private_key_path: PathBuf,
    pub passphrase: Option<Secret>,
    /// Port bound on 127.0.0.1
    pub local_port: u16,
    /// Database endpoint, resolved from the bastion
    pub remote_host: String,
    pub remote_port: u16,
    pub connect_timeout: Duration,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// A missing `.env` file is not an error; an unreadable one is
fn env_file_loaded<T>(result: Result<T, dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(ConfigError::EnvFile(e.to_string())),
    }
}

impl Config {
    /// Read `.env`, parse flags and environment, then validate
    pub fn load() -> Result<Self, ConfigError> {
        env_file_loaded(dotenvy::dotenv())?;
        Self::from_args(std::env::args_os())
    }

    /// Parse and validate the given argument list
    ///
    /// `--help` and `--version` print and exit; any other parse failure is
    /// returned as a configuration error.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                e.exit()
            }
            Err(e) => return Err(ConfigError::Arguments(e.to_string())),
        };
        Self::try_from(cli)
    }
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let name = required(cli.db_name, "DB_NAME")?;
        let user = required(cli.db_user, "DB_USER")?;
        let password = required(cli.db_pass, "DB_PASS")?;
        let host = required(cli.db_host, "DB_HOST")?;

        if cli.db_connection_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "DB_CONNECTION_LIMIT",
                reason: "must be at least 1".to_string(),
            });
        }
        if cli.db_connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "DB_CONNECT_TIMEOUT_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        let connect_timeout = Duration::from_secs(cli.db_connect_timeout_secs);

        let tunnel = if cli.use_ssh_tunnel {
            let bastion_user = required(cli.ssh_bastion_user, "SSH_BASTION_USER")?;
            let bastion_host = required(cli.ssh_bastion_host, "SSH_BASTION_HOST")?;
            let private_key_path = cli
                .ssh_private_key_path
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or(ConfigError::Missing("SSH_PRIVATE_KEY_PATH"))?;
            if !private_key_path.is_file() {
                return Err(ConfigError::KeyNotFound(private_key_path));
            }

            Some(TunnelConfig {
                bastion_host,
                bastion_port: cli.ssh_bastion_port,
                bastion_user,
                private_key_path,
                passphrase: cli
                    .ssh_private_key_passphrase
                    .filter(|p| !p.is_empty())
                    .map(Secret::new),
                local_port: cli.local_port,
                remote_host: host.clone(),
                remote_port: cli.db_port,
                connect_timeout,
            })
        } else {
            None
        };

        Ok(Self {
            database: DatabaseConfig {
                host,
                port: cli.db_port,
                user,
                password: Secret::new(password),
                name,
                connection_limit: cli.db_connection_limit,
                connect_timeout,
            },
            tunnel,
            query_timeout: (cli.query_timeout_secs > 0)
                .then(|| Duration::from_secs(cli.query_timeout_secs)),
        })
    }
}
