//! # Web Shell Gateway Library
//!
//! This crate lets a browser terminal drive an interactive shell on a remote
//! host over SSH.
//!
//! ## Overview
//!
//! - **Session Registry**: starts, tracks and tears down remote shell sessions
//! - **Subscriber Fan-out**: relays each session's output to every attached
//!   push stream or socket in the order the channel produced it
//! - **Remote-Shell Client**: the capability the registry drives, with an
//!   OpenSSH implementation running the system `ssh` under a PTY
//! - **HTTP Surface**: request/response routes, Server-Sent-Events output and
//!   a WebSocket transport
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 HTTP routes / SSE / WebSocket            │
//! ├──────────────────────────────────────────────────────────┤
//! │                      SessionGateway                      │
//! │   ┌────────────────────────────────────────────────────┐ │
//! │   │ SessionRegistry: id → Session (driver task each)   │ │
//! │   └────────────────────────────────────────────────────┘ │
//! ├──────────────────────────────────────────────────────────┤
//! │          RemoteShellClient (OpenSSH under a PTY)         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gateway::{AppState, Config, OpenSshConnector, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(gateway::config::default_config_path())?;
//!
//!     let connector = OpenSshConnector::new(config.ssh_settings());
//!     let registry = SessionRegistry::with_options(connector, config.registry_options());
//!     let state = AppState::new(Arc::new(registry), config.http_settings());
//!
//!     let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;
//!     gateway::serve(listener, state, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Session registry, fan-out and remote-shell clients
//! - [`transport`]: Push-stream and socket subscribers
//! - [`server`]: HTTP routes, error mapping and the token gate
//! - [`askpass`]: Password helper mode for ssh

pub mod askpass;
pub mod config;
pub mod server;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export server types for convenience
pub use server::{build_router, serve, ApiError, AppState, HttpSettings};

// Re-export session types for convenience
pub use session::{
    ClientError, ClientFactory, ConnectParams, OpenSshConnector, Readiness, RegistryOptions,
    RemoteShellClient, SessionError, SessionGateway, SessionId, SessionInfo, SessionRegistry,
    SessionState, ShellChannel, Subscriber,
};
