//! Remote shell sessions.
//!
//! A session owns one remote-shell client and, once ready, its channel. Each
//! session runs a driver task that is the only code touching the client and
//! channel: it connects, relays inbound events to subscribers in the order
//! the channel emitted them, and applies queued writes and resizes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use protocol::{SessionSummary, StreamEvent};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::client::{
    ChannelEvent, ClientError, ConnectParams, OpenedShell, PtyRequest, RemoteShellClient,
    ShellChannel,
};
use super::multiplexer::SubscriberSet;

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The session's channel is not established yet.
    #[error("session not ready: {0}")]
    NotReady(SessionId),

    /// Connecting or authenticating failed.
    #[error("connect failed: {0}")]
    Connect(#[source] ClientError),

    /// The channel failed mid-session.
    #[error("channel failed: {0}")]
    Channel(String),

    /// The session was closed before it became ready.
    #[error("session closed before it became ready: {0}")]
    Aborted(SessionId),

    /// Too many live sessions.
    #[error("session limit reached: {0} live sessions")]
    LimitReached(usize),

    /// The id generator produced an id that is still live.
    #[error("session id already in use: {0}")]
    IdInUse(SessionId),

    /// Terminal dimensions must be positive.
    #[error("invalid terminal size: {cols}x{rows}")]
    InvalidSize {
        /// Requested columns.
        cols: u16,
        /// Requested rows.
        rows: u16,
    },
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connect → authenticate → open-shell in progress.
    Connecting,
    /// The channel is established.
    Ready,
    /// Connecting failed; terminal.
    Failed,
    /// The session ended; terminal.
    Closed,
}

impl SessionState {
    /// Returns whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }

    /// Returns the lowercase name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        }
    }
}

/// Commands queued for the session driver.
#[derive(Debug)]
pub(crate) enum Command {
    Write(Bytes),
    Resize { cols: u16, rows: u16 },
}

/// Information about a session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Number of attached subscribers.
    pub subscribers: usize,
    /// Creation time (Unix epoch milliseconds).
    pub created_at: u64,
}

impl SessionInfo {
    /// Converts to the wire summary.
    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            state: self.state.as_str().to_string(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            subscribers: self.subscribers,
            created_at: self.created_at,
        }
    }
}

/// A live remote shell session as held by the registry.
pub struct Session {
    id: SessionId,
    host: String,
    port: u16,
    username: String,
    created_at: u64,
    state: Mutex<SessionState>,
    pub(crate) subscribers: SubscriberSet,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl Session {
    /// Creates a session in the Connecting state.
    ///
    /// Returns the session and the receiving end of its command queue.
    pub(crate) fn new(
        id: SessionId,
        params: &ConnectParams,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let session = Session {
            id,
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
            created_at: now_millis(),
            state: Mutex::new(SessionState::Connecting),
            subscribers: SubscriberSet::new(),
            commands,
            cancel: CancellationToken::new(),
        };
        (session, commands_rx)
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Moves Connecting → Ready. Fails if the session already ended.
    pub(crate) fn mark_ready(&self) -> bool {
        let mut state = self.lock_state();
        if *state != SessionState::Connecting {
            return false;
        }
        *state = SessionState::Ready;
        true
    }

    /// Moves to a terminal state. Only the first call succeeds.
    pub(crate) fn finish(&self, terminal: SessionState) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut state = self.lock_state();
        if state.is_terminal() {
            return false;
        }
        *state = terminal;
        true
    }

    /// Queues a command for the driver, failing unless the channel is up.
    pub(crate) fn submit(&self, command: Command) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Ready => {}
            SessionState::Connecting => return Err(SessionError::NotReady(self.id.clone())),
            SessionState::Failed | SessionState::Closed => {
                return Err(SessionError::NotFound(self.id.clone()))
            }
        }
        self.commands
            .send(command)
            .map_err(|_| SessionError::NotFound(self.id.clone()))
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a snapshot of this session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state: self.state(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            subscribers: self.subscribers.len(),
            created_at: self.created_at,
        }
    }
}

/// Slots held by live sessions against the session limit.
///
/// A slot is claimed before a session is inserted and released by its
/// teardown, so concurrent starts cannot overshoot the limit.
#[derive(Debug)]
pub(crate) struct SessionSlots {
    taken: AtomicUsize,
    limit: usize,
}

impl SessionSlots {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            taken: AtomicUsize::new(0),
            limit,
        }
    }

    /// Claims a slot. Fails with the number of slots in use when none is free.
    pub(crate) fn claim(&self) -> Result<(), usize> {
        self.taken
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < self.limit).then_some(taken + 1)
            })
            .map(|_| ())
    }

    pub(crate) fn release(&self) {
        let _ = self
            .taken
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                taken.checked_sub(1)
            });
    }

    #[cfg(test)]
    pub(crate) fn taken(&self) -> usize {
        self.taken.load(Ordering::Acquire)
    }
}

/// Ends a session: closes every subscriber once, then drops the registry
/// entry and releases its slot.
///
/// Returns false if the session had already ended.
pub(crate) fn teardown(
    sessions: &DashMap<SessionId, Arc<Session>>,
    slots: &SessionSlots,
    session: &Session,
    terminal: SessionState,
    last: Option<StreamEvent>,
) -> bool {
    if !session.finish(terminal) {
        return false;
    }

    let notified = session.subscribers.shutdown(last);
    session.cancel();
    sessions.remove(session.id());
    slots.release();

    tracing::info!(
        session_id = %session.id(),
        state = terminal.as_str(),
        subscribers = notified,
        "Session removed"
    );
    true
}

/// Resolves once a session's channel is usable.
///
/// Rejects with [`SessionError::Connect`] if connecting failed and with
/// [`SessionError::Aborted`] if the session was closed first.
pub struct Readiness {
    id: SessionId,
    rx: oneshot::Receiver<Result<(), SessionError>>,
}

impl Readiness {
    pub(crate) fn new(id: SessionId) -> (Self, oneshot::Sender<Result<(), SessionError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, rx }, tx)
    }

    /// Returns the id of the session this future belongs to.
    pub fn session_id(&self) -> &SessionId {
        &self.id
    }
}

impl Future for Readiness {
    type Output = Result<SessionId, SessionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(()))) => Poll::Ready(Ok(this.id.clone())),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SessionError::Aborted(this.id.clone()))),
        }
    }
}

/// Everything a driver task needs.
pub(crate) struct Driver<C> {
    pub sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    pub slots: Arc<SessionSlots>,
    pub session: Arc<Session>,
    pub client: C,
    pub params: ConnectParams,
    pub pty: PtyRequest,
    pub connect_timeout: Duration,
    pub ready_tx: oneshot::Sender<Result<(), SessionError>>,
    pub commands: mpsc::UnboundedReceiver<Command>,
}

/// Why the relay loop stopped.
enum Ending {
    Cancelled,
    PeerClosed,
    Failed(String),
}

async fn establish<C: RemoteShellClient>(
    client: &mut C,
    params: &ConnectParams,
    pty: &PtyRequest,
) -> Result<OpenedShell<C::Channel>, ClientError> {
    client.connect(params).await?;
    client.open_shell(pty).await
}

impl<C: RemoteShellClient> Driver<C> {
    /// Runs the session from connect to teardown.
    pub(crate) async fn run(self) {
        let Driver {
            sessions,
            slots,
            session,
            mut client,
            params,
            pty,
            connect_timeout,
            ready_tx,
            mut commands,
        } = self;
        let session_id = session.id().clone();
        let cancel = session.cancel.clone();

        let outcome = {
            let attempt = establish(&mut client, &params, &pty);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = tokio::time::timeout(connect_timeout, attempt) => Some(
                    result.unwrap_or(Err(ClientError::Timeout(connect_timeout))),
                ),
            }
        };

        let opened = match outcome {
            None => {
                tracing::info!(session_id = %session_id, "Connect aborted by close");
                let _ = ready_tx.send(Err(SessionError::Aborted(session_id)));
                client.disconnect().await;
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(
                    session_id = %session_id,
                    host = %params.host,
                    error = %e,
                    "Connect failed"
                );
                let message = e.to_string();
                teardown(
                    &sessions,
                    &slots,
                    &session,
                    SessionState::Failed,
                    Some(StreamEvent::error(message)),
                );
                let _ = ready_tx.send(Err(SessionError::Connect(e)));
                client.disconnect().await;
                return;
            }
            Some(Ok(opened)) => opened,
        };

        let OpenedShell {
            mut channel,
            mut events,
        } = opened;

        if !session.mark_ready() {
            tracing::debug!(session_id = %session_id, "Session closed while opening shell");
            channel.close().await;
            client.disconnect().await;
            let _ = ready_tx.send(Err(SessionError::Aborted(session_id)));
            return;
        }

        tracing::info!(
            session_id = %session_id,
            host = %params.host,
            port = params.port,
            "Session ready"
        );
        let _ = ready_tx.send(Ok(()));

        let ending = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ending::Cancelled,
                event = events.recv() => match event {
                    Some(ChannelEvent::Data(bytes)) => {
                        session.subscribers.broadcast(&StreamEvent::data(bytes));
                    }
                    Some(ChannelEvent::Stderr(bytes)) => {
                        session.subscribers.broadcast(&StreamEvent::stderr(bytes));
                    }
                    Some(ChannelEvent::Error(message)) => break Ending::Failed(message),
                    Some(ChannelEvent::Closed) | None => break Ending::PeerClosed,
                },
                Some(command) = commands.recv() => {
                    let applied = async {
                        match command {
                            Command::Write(data) => channel.write(&data).await,
                            Command::Resize { cols, rows } => channel.resize(cols, rows).await,
                        }
                    };
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Ending::Cancelled,
                        result = applied => result,
                    };
                    if let Err(e) = result {
                        break Ending::Failed(e.to_string());
                    }
                }
            }
        };

        match ending {
            Ending::Cancelled => {
                tracing::debug!(session_id = %session_id, "Session driver cancelled");
            }
            Ending::PeerClosed => {
                tracing::info!(session_id = %session_id, "Channel closed by peer");
                teardown(
                    &sessions,
                    &slots,
                    &session,
                    SessionState::Closed,
                    Some(StreamEvent::close()),
                );
            }
            Ending::Failed(message) => {
                tracing::error!(session_id = %session_id, error = %message, "Channel failed");
                let error = SessionError::Channel(message);
                teardown(
                    &sessions,
                    &slots,
                    &session,
                    SessionState::Closed,
                    Some(StreamEvent::error(error.to_string())),
                );
            }
        }

        channel.close().await;
        client.disconnect().await;
    }
}

/// Returns the current Unix timestamp in milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectParams {
        ConnectParams::new("10.0.0.5", 22, "root")
    }

    #[test]
    fn test_new_session_is_connecting() {
        let (session, _rx) = Session::new("s-1".into(), &params());
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.id(), "s-1");
        assert_eq!(session.info().host, "10.0.0.5");
    }

    #[test]
    fn test_submit_before_ready_is_not_ready() {
        let (session, mut rx) = Session::new("s-1".into(), &params());
        let result = session.submit(Command::Write(Bytes::from_static(b"ls\n")));
        assert!(matches!(result, Err(SessionError::NotReady(id)) if id == "s-1"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_submit_after_ready_is_queued() {
        let (session, mut rx) = Session::new("s-1".into(), &params());
        assert!(session.mark_ready());
        session
            .submit(Command::Resize { cols: 120, rows: 40 })
            .unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(Command::Resize { cols: 120, rows: 40 })
        ));
    }

    #[test]
    fn test_finish_only_once() {
        let (session, _rx) = Session::new("s-1".into(), &params());
        assert!(session.finish(SessionState::Closed));
        assert!(!session.finish(SessionState::Failed));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.mark_ready());
    }

    #[test]
    fn test_submit_after_close_is_not_found() {
        let (session, _rx) = Session::new("s-1".into(), &params());
        session.mark_ready();
        session.finish(SessionState::Closed);
        let result = session.submit(Command::Write(Bytes::from_static(b"x")));
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_readiness_resolves_with_id() {
        let (readiness, tx) = Readiness::new("s-1".into());
        tx.send(Ok(())).unwrap();
        assert_eq!(readiness.await.unwrap(), "s-1");
    }

    #[tokio::test]
    async fn test_readiness_dropped_sender_is_aborted() {
        let (readiness, tx) = Readiness::new("s-1".into());
        drop(tx);
        assert!(matches!(readiness.await, Err(SessionError::Aborted(_))));
    }

    #[test]
    fn test_slots_stop_at_limit_and_release() {
        let slots = SessionSlots::new(2);
        assert!(slots.claim().is_ok());
        assert!(slots.claim().is_ok());
        assert_eq!(slots.claim(), Err(2));

        slots.release();
        assert_eq!(slots.taken(), 1);
        assert!(slots.claim().is_ok());

        slots.release();
        slots.release();
        slots.release();
        assert_eq!(slots.taken(), 0);
    }

    #[test]
    fn test_summary_uses_state_name() {
        let (session, _rx) = Session::new("s-1".into(), &params());
        let summary = session.info().to_summary();
        assert_eq!(summary.state, "connecting");
        assert_eq!(summary.port, 22);
        assert_eq!(summary.subscribers, 0);
    }
}
