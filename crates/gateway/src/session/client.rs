//! Remote-shell client capability.
//!
//! The registry never speaks the remote-shell protocol itself. It drives a
//! [`RemoteShellClient`] through connect → authenticate → open-shell and then
//! exchanges bytes with the resulting [`ShellChannel`]. Inbound traffic arrives
//! on a separate event receiver so the session driver can wait for output and
//! for caller commands at the same time.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity adapters should use for their channel event queue.
pub const CHANNEL_EVENT_CAPACITY: usize = 256;

/// Errors reported by a remote-shell client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The interactive shell channel could not be opened.
    #[error("failed to open shell: {0}")]
    Shell(String),

    /// Writing to the channel failed.
    #[error("channel write failed: {0}")]
    Write(String),

    /// Resizing the channel failed.
    #[error("channel resize failed: {0}")]
    Resize(String),

    /// Connect did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and as whom to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Password; `None` means key-based authentication.
    pub password: Option<String>,
}

impl ConnectParams {
    /// Creates parameters for key-based authentication.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: None,
        }
    }

    /// Sets the password credential.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

// Credentials never reach logs.
impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Pseudo-terminal parameters for the interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Terminal type advertised to the remote side.
    pub term: String,
    /// Initial columns.
    pub cols: u16,
    /// Initial rows.
    pub rows: u16,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Inbound traffic from an open shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Bytes from the remote stdout.
    Data(Bytes),
    /// Bytes from the remote stderr.
    Stderr(Bytes),
    /// The channel failed.
    Error(String),
    /// The peer closed the channel.
    Closed,
}

/// Receiver half for a channel's inbound events.
///
/// A dropped sender is treated the same as [`ChannelEvent::Closed`].
pub type ChannelEvents = mpsc::Receiver<ChannelEvent>;

/// Outbound half of an interactive shell channel.
pub trait ShellChannel: Send + 'static {
    /// Writes bytes to the remote stdin.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Changes the remote viewport size.
    fn resize(&mut self, cols: u16, rows: u16)
        -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Closes the channel. Must be safe to call more than once.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// A freshly opened shell: the outbound channel and its inbound events.
pub struct OpenedShell<C> {
    /// Outbound half.
    pub channel: C,
    /// Inbound half.
    pub events: ChannelEvents,
}

/// One remote-shell connection.
///
/// A client is created per session and is exclusively owned by the session
/// driver. Dropping the future returned by [`connect`](Self::connect) or
/// [`open_shell`](Self::open_shell) aborts the attempt; the driver then calls
/// [`disconnect`](Self::disconnect) to release whatever was acquired.
pub trait RemoteShellClient: Send + 'static {
    /// The channel type produced by [`open_shell`](Self::open_shell).
    type Channel: ShellChannel;

    /// Connects and authenticates.
    fn connect(
        &mut self,
        params: &ConnectParams,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Opens an interactive shell on a connected client.
    fn open_shell(
        &mut self,
        pty: &PtyRequest,
    ) -> impl Future<Output = Result<OpenedShell<Self::Channel>, ClientError>> + Send;

    /// Releases the connection. Must be safe to call in any state.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// Creates a fresh client for each new session.
pub trait ClientFactory: Send + Sync + 'static {
    /// The client type produced.
    type Client: RemoteShellClient;

    /// Creates an unconnected client.
    fn create(&self) -> Self::Client;
}
