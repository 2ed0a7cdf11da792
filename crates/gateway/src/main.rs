//! Web Shell Gateway
//!
//! HTTP gateway between browser terminals and remote SSH shells.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gateway::config::{default_config_path, Config};
use gateway::{askpass, AppState, OpenSshConnector, SessionRegistry};
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Web Shell Gateway - browser access to remote shells over SSH.
#[derive(Parser, Debug)]
#[command(name = "webshell-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the gateway.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ssh runs us as its askpass helper with the prompt as the only argument
    if let Some(secret) = askpass::secret_from_env() {
        askpass::respond(&mut std::io::stdout().lock(), &secret)?;
        return Ok(());
    }

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Serve { bind } => run_server(&config_path, bind, cli.verbose).await,
        Commands::Config(ConfigCommands::Init { force }) => config_init(&config_path, force),
        Commands::Config(ConfigCommands::Show) => config_show(&config_path),
    }
}

/// Load, override and validate the configuration, then serve until a
/// shutdown signal arrives.
async fn run_server(config_path: &Path, bind: Option<String>, verbose: bool) -> anyhow::Result<()> {
    let mut config = Config::load(config_path)?;
    config.apply_env_overrides();
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    let level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    let _log_guard = init_logging(&level, config.logging.file.as_deref())?;

    tracing::info!("Web shell gateway starting...");
    tracing::debug!("Using config file: {:?}", config_path);

    config.validate()?;
    let addr = config.bind_addr()?;

    let connector = OpenSshConnector::new(config.ssh_settings());
    let registry = SessionRegistry::with_options(connector, config.registry_options());
    let state = AppState::new(Arc::new(registry), config.http_settings());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        auth = config.server.auth_token.is_some(),
        max_sessions = config.session.max_sessions,
        "Listening"
    );

    gateway::serve(listener, state, wait_for_shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Initialize tracing: stderr always, plus a log file when configured.
///
/// `RUST_LOG` takes precedence over `level`. The returned guard flushes the
/// file writer on drop.
fn init_logging(level: &str, file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    let Some(path) = file else {
        registry.init();
        return Ok(None);
    };

    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

fn config_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn config_show(path: &Path) -> anyhow::Result<()> {
    let mut config = Config::load(path)?;
    config.apply_env_overrides();
    if config.server.auth_token.is_some() {
        config.server.auth_token = Some("<redacted>".to_string());
    }
    println!("# {}", path.display());
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl-C");
}
