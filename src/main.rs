use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use filegate_server::config::{AppConfig, CliConfig, FileConfig};
use filegate_server::downloads::DownloadStore;
use filegate_server::server::{run_server, RequestsLoggingLevel, ServerConfig};
use filegate_server::{SqliteDownloadStore, SqliteUserStore, TokenSecret};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the server's SQLite databases.
    #[clap(value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file; its values override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Secret used to salt opaque download tokens. Must stay stable across
    /// restarts or previously rendered opaque links go dead.
    #[clap(long)]
    pub token_secret: Option<String>,

    /// First path segment of download URLs.
    #[clap(long, default_value = "secure-download")]
    pub download_route_prefix: String,

    /// Path the browser is sent to when a gated download has no session.
    #[clap(long, default_value = "/login")]
    pub login_path: String,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;

    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
        port: cli_args.port,
        logging_level: cli_args.logging_level,
        token_secret: cli_args.token_secret,
        download_route_prefix: cli_args.download_route_prefix,
        login_path: cli_args.login_path,
        frontend_dir_path: cli_args.frontend_dir_path,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening user database at {:?}...", config.user_db_path());
    let user_store = Box::new(SqliteUserStore::new(config.user_db_path())?);

    info!(
        "Opening downloads database at {:?}...",
        config.downloads_db_path()
    );
    let download_store: Arc<dyn DownloadStore> =
        Arc::new(SqliteDownloadStore::new(config.downloads_db_path())?);

    let token_secret = TokenSecret::new(&config.token_secret);

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        download_route_prefix: config.download_route_prefix.clone(),
        login_path: config.login_path.clone(),
        frontend_dir_path: config.frontend_dir_path.clone(),
    };

    info!("Ready to serve at port {}!", config.port);
    run_server(server_config, download_store, user_store, token_secret).await
}
