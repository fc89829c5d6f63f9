mod file_config;

pub use file_config::FileConfig;

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that take part in config resolution. Mirrors the CLI
/// arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub token_secret: Option<String>,
    pub download_route_prefix: String,
    pub login_path: String,
    pub frontend_dir_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub token_secret: String,
    pub download_route_prefix: String,
    pub login_path: String,
    pub frontend_dir_path: Option<String>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via the CLI or in the config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let token_secret = file
            .token_secret
            .or_else(|| cli.token_secret.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "token_secret must be specified via --token-secret or in the config file"
                )
            })?;
        if token_secret.is_empty() {
            bail!("token_secret cannot be empty");
        }

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let download_route_prefix = file
            .download_route_prefix
            .unwrap_or_else(|| cli.download_route_prefix.clone());
        if download_route_prefix.is_empty() || download_route_prefix.contains('/') {
            bail!(
                "download_route_prefix must be a single non-empty path segment, got {:?}",
                download_route_prefix
            );
        }

        let login_path = file.login_path.unwrap_or_else(|| cli.login_path.clone());
        if !login_path.starts_with('/') {
            bail!("login_path must start with '/', got {:?}", login_path);
        }

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        Ok(Self {
            db_dir,
            port,
            logging_level,
            token_secret,
            download_route_prefix,
            login_path,
            frontend_dir_path,
        })
    }

    pub fn user_db_path(&self) -> PathBuf {
        self.db_dir.join("user.db")
    }

    pub fn downloads_db_path(&self) -> PathBuf {
        self.db_dir.join("downloads.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
