//! Configuration management for the web shell gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/webshell/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::server::HttpSettings;
use crate::session::{PtyRequest, RegistryOptions, SshSettings};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind must be a socket address such as 127.0.0.1:3000, got {0}")]
    InvalidBind(String),

    #[error("subscriber_capacity must be between 1 and 1048576, got {0}")]
    InvalidSubscriberCapacity(usize),

    #[error("max_sessions must be between 1 and 10000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("connect_timeout_secs must be between 1 and 600, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("default_port must be greater than 0")]
    InvalidDefaultPort,

    #[error("terminal size must be positive, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("ssh binary not found: {0}")]
    InvalidSshBinary(String),

    #[error("strict_host_key_checking must be one of: yes, no, accept-new, ask; got {0}")]
    InvalidHostKeyPolicy(String),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid `StrictHostKeyChecking` values.
const VALID_HOST_KEY_POLICIES: &[&str] = &["yes", "no", "accept-new", "ask"];

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Session registry configuration.
    pub session: SessionConfig,

    /// OpenSSH client configuration.
    pub ssh: SshConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: String,

    /// Bearer token required on `/api` routes. Unset leaves them open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Queue depth of each stream or socket subscriber.
    pub subscriber_capacity: usize,

    /// Seconds between push-stream keep-alive comments.
    pub keep_alive_secs: u64,
}

/// Session registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Seconds allowed from start to a usable shell.
    pub connect_timeout_secs: u64,

    /// Port used when a start request omits one.
    pub default_port: u16,

    /// Terminal type requested for every shell.
    pub term: String,

    /// Initial terminal columns.
    pub cols: u16,

    /// Initial terminal rows.
    pub rows: u16,
}

/// OpenSSH client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// The ssh binary, by name or path.
    pub binary: String,

    /// Host key policy passed as `StrictHostKeyChecking`.
    pub strict_host_key_checking: String,

    /// Extra arguments passed to every ssh invocation.
    pub extra_args: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Also write logs to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            auth_token: None,
            subscriber_capacity: 1024,
            keep_alive_secs: 15,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            connect_timeout_secs: 20,
            default_port: 22,
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            strict_host_key_checking: "accept-new".to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webshell")
        .join("config.toml")
}

/// Reads a non-empty environment variable.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WEBSHELL_BIND: Override listen address
    /// - WEBSHELL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - WEBSHELL_AUTH_TOKEN: Override the API bearer token
    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_override("WEBSHELL_BIND") {
            tracing::info!("Overriding bind from environment: {}", bind);
            self.server.bind = bind;
        }

        if let Some(level) = env_override("WEBSHELL_LOG_LEVEL") {
            tracing::info!("Overriding log level from environment: {}", level);
            self.logging.level = level;
        }

        if let Some(token) = env_override("WEBSHELL_AUTH_TOKEN") {
            tracing::info!("Overriding auth token from environment");
            self.server.auth_token = Some(token);
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        let capacity = self.server.subscriber_capacity;
        if !(1..=1 << 20).contains(&capacity) {
            return Err(ConfigError::InvalidSubscriberCapacity(capacity));
        }

        let max = self.session.max_sessions;
        if !(1..=10_000).contains(&max) {
            return Err(ConfigError::InvalidMaxSessions(max));
        }

        let timeout = self.session.connect_timeout_secs;
        if !(1..=600).contains(&timeout) {
            return Err(ConfigError::InvalidConnectTimeout(timeout));
        }

        if self.session.default_port == 0 {
            return Err(ConfigError::InvalidDefaultPort);
        }

        let (cols, rows) = (self.session.cols, self.session.rows);
        if cols == 0 || rows == 0 {
            return Err(ConfigError::InvalidTerminalSize { cols, rows });
        }

        // Absolute paths must exist; bare names must resolve on PATH
        let binary = Path::new(&self.ssh.binary);
        let found = if binary.is_absolute() {
            binary.exists()
        } else {
            which::which(&self.ssh.binary).is_ok()
        };
        if !found {
            return Err(ConfigError::InvalidSshBinary(self.ssh.binary.clone()));
        }

        let policy = self.ssh.strict_host_key_checking.to_lowercase();
        if !VALID_HOST_KEY_POLICIES.contains(&policy.as_str()) {
            return Err(ConfigError::InvalidHostKeyPolicy(
                self.ssh.strict_host_key_checking.clone(),
            ));
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Parses the listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.server.bind.clone()))
    }

    /// Registry options derived from the `[session]` section.
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            max_sessions: self.session.max_sessions,
            connect_timeout: Duration::from_secs(self.session.connect_timeout_secs),
            pty: PtyRequest {
                term: self.session.term.clone(),
                cols: self.session.cols,
                rows: self.session.rows,
            },
        }
    }

    /// OpenSSH settings derived from the `[ssh]` section.
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            binary: PathBuf::from(&self.ssh.binary),
            strict_host_key_checking: self.ssh.strict_host_key_checking.clone(),
            extra_args: self.ssh.extra_args.clone(),
            term: self.session.term.clone(),
            ..SshSettings::default()
        }
    }

    /// HTTP settings derived from the `[server]` and `[session]` sections.
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            auth_token: self.server.auth_token.clone(),
            subscriber_capacity: self.server.subscriber_capacity,
            default_port: self.session.default_port,
            keep_alive: Duration::from_secs(self.server.keep_alive_secs.max(1)),
        }
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
