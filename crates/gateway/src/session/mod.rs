//! Session management module.
//!
//! This module provides the session registry, subscriber fan-out, the
//! remote-shell client capability and its OpenSSH implementation.

pub mod client;
pub mod manager;
pub mod multiplexer;
pub mod openssh;
pub mod shell;

pub use client::{
    ChannelEvent, ChannelEvents, ClientError, ClientFactory, ConnectParams, OpenedShell,
    PtyRequest, RemoteShellClient, ShellChannel, CHANNEL_EVENT_CAPACITY,
};
pub use manager::{IdGenerator, RegistryOptions, SessionGateway, SessionRegistry, UuidGenerator};
pub use multiplexer::{Subscriber, SubscriberSet};
pub use openssh::{OpenSshChannel, OpenSshClient, OpenSshConnector, SshSettings};
pub use shell::{Readiness, Session, SessionError, SessionId, SessionInfo, SessionState};
