//! Shared harness for the HTTP, push-stream and socket tests.
//!
//! The gateway runs on an ephemeral port with an in-process shell client.
//! The remote host name picks the client's behavior:
//!
//! - `reject.test`: authentication fails
//! - `hang.test`: connect never finishes
//! - anything else: connects and echoes input back as `data`

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gateway::session::{ChannelEvent, OpenedShell, PtyRequest};
use gateway::{
    AppState, ClientError, ClientFactory, ConnectParams, HttpSettings, RegistryOptions,
    RemoteShellClient, SessionGateway, SessionRegistry, ShellChannel,
};
use protocol::{SseDecoder, StreamEvent};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const REJECT_HOST: &str = "reject.test";
pub const HANG_HOST: &str = "hang.test";

/// Input that makes the echo shell hang up.
pub const EXIT_INPUT: &str = "exit\n";

// ── Echo shell ───────────────────────────────────────────────────────

pub struct EchoFactory;

impl ClientFactory for EchoFactory {
    type Client = EchoClient;

    fn create(&self) -> EchoClient {
        EchoClient
    }
}

pub struct EchoClient;

impl RemoteShellClient for EchoClient {
    type Channel = EchoChannel;

    async fn connect(&mut self, params: &ConnectParams) -> Result<(), ClientError> {
        match params.host.as_str() {
            REJECT_HOST => Err(ClientError::Auth("Permission denied (password)".into())),
            HANG_HOST => std::future::pending().await,
            _ => Ok(()),
        }
    }

    async fn open_shell(
        &mut self,
        _pty: &PtyRequest,
    ) -> Result<OpenedShell<EchoChannel>, ClientError> {
        let (tx, rx) = mpsc::channel(64);
        Ok(OpenedShell {
            channel: EchoChannel { tx },
            events: rx,
        })
    }

    async fn disconnect(&mut self) {}
}

pub struct EchoChannel {
    tx: mpsc::Sender<ChannelEvent>,
}

impl ShellChannel for EchoChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let event = if data == EXIT_INPUT.as_bytes() {
            ChannelEvent::Closed
        } else {
            ChannelEvent::Data(Bytes::copy_from_slice(data))
        };
        let _ = self.tx.send(event).await;
        Ok(())
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> Result<(), ClientError> {
        let note = format!("resized {cols}x{rows}");
        let _ = self.tx.send(ChannelEvent::Stderr(note.into())).await;
        Ok(())
    }

    async fn close(&mut self) {}
}

// ── Server ───────────────────────────────────────────────────────────

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry<EchoFactory>>,
    stop: CancellationToken,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(HttpSettings::default(), RegistryOptions::default()).await
}

pub async fn start_server_with(settings: HttpSettings, options: RegistryOptions) -> TestServer {
    let registry = Arc::new(SessionRegistry::with_options(EchoFactory, options));
    let shared: Arc<dyn SessionGateway> = registry.clone();
    let state = AppState::new(shared, settings);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = CancellationToken::new();
    let signal = stop.clone();

    tokio::spawn(async move {
        gateway::serve(listener, state, async move { signal.cancelled().await })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        registry,
        stop,
    }
}

// ── Push-stream reading ──────────────────────────────────────────────

/// Reads the push stream until `count` events arrived or the body ended.
pub async fn read_events(
    response: &mut reqwest::Response,
    decoder: &mut SseDecoder,
    count: usize,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while events.len() < count {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for push stream")
            .unwrap();
        let Some(chunk) = chunk else {
            break;
        };
        let text = std::str::from_utf8(&chunk).unwrap();
        events.extend(decoder.push(text).unwrap());
    }
    events
}

/// Polls `check` until it holds, for at most two seconds.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
