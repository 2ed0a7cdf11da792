//! Session registry.
//!
//! This module provides the registry that starts, tracks and tears down
//! remote shell sessions, and the [`SessionGateway`] operations collaborators
//! use to drive them. The registry is an ordinary value: construct it with a
//! client factory and share it behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::client::{ClientFactory, ConnectParams, PtyRequest};
use super::multiplexer::Subscriber;
use super::shell::{
    teardown, Command, Driver, Readiness, Session, SessionError, SessionId, SessionInfo,
    SessionSlots, SessionState,
};

/// Gateway operations on remote shell sessions.
///
/// Every operation is keyed by session id, returns without waiting on the
/// network, and is safe to call concurrently. `start` must be called from
/// within a Tokio runtime.
pub trait SessionGateway: Send + Sync {
    /// Starts a new session.
    ///
    /// Returns immediately with the session id and a future that resolves
    /// once the shell channel is usable.
    fn start(&self, params: ConnectParams) -> Result<(SessionId, Readiness), SessionError>;

    /// Attaches a subscriber to a session's output.
    ///
    /// Safe before the session is ready. A subscriber attached to another
    /// session is moved.
    fn subscribe(&self, session_id: &str, subscriber: &Arc<dyn Subscriber>)
        -> Result<(), SessionError>;

    /// Detaches a subscriber. A no-op if either is already gone.
    fn unsubscribe(&self, session_id: &str, subscriber: &Arc<dyn Subscriber>);

    /// Forwards bytes verbatim to the session's channel.
    fn write(&self, session_id: &str, data: &[u8]) -> Result<(), SessionError>;

    /// Changes the session's viewport size.
    fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), SessionError>;

    /// Closes a session in any state. A no-op if it is already gone.
    fn close(&self, session_id: &str);

    /// Closes every session.
    fn close_all(&self);

    /// Lists all live sessions.
    fn list(&self) -> Vec<SessionInfo>;

    /// Gets information about a specific session.
    fn get(&self, session_id: &str) -> Option<SessionInfo>;

    /// Checks if a session exists.
    fn exists(&self, session_id: &str) -> bool;

    /// Returns the number of live sessions.
    fn count(&self) -> usize;
}

/// Produces session identifiers.
pub trait IdGenerator: Send + Sync + 'static {
    /// Returns a fresh identifier.
    fn next_id(&self) -> SessionId;
}

impl<F> IdGenerator for F
where
    F: Fn() -> SessionId + Send + Sync + 'static,
{
    fn next_id(&self) -> SessionId {
        self()
    }
}

/// Generates random UUID v4 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> SessionId {
        Uuid::new_v4().to_string()
    }
}

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Maximum number of live sessions.
    pub max_sessions: usize,
    /// Upper bound on connect → ready.
    pub connect_timeout: Duration,
    /// Pseudo-terminal requested for every shell.
    pub pty: PtyRequest,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            connect_timeout: Duration::from_secs(20),
            pty: PtyRequest::default(),
        }
    }
}

/// Thread-safe session registry using DashMap.
///
/// Sessions are inserted on `start` and removed the moment they reach a
/// terminal state, after their subscribers have been closed.
pub struct SessionRegistry<F: ClientFactory> {
    /// Map of session ID to session.
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    /// Slots against `max_sessions`, claimed before insertion.
    slots: Arc<SessionSlots>,
    /// Creates one client per session.
    factory: F,
    /// Produces session IDs.
    ids: Box<dyn IdGenerator>,
    options: RegistryOptions,
}

impl<F: ClientFactory> SessionRegistry<F> {
    /// Creates a registry with default options and UUID session ids.
    pub fn new(factory: F) -> Self {
        Self::with_options(factory, RegistryOptions::default())
    }

    /// Creates a registry with explicit options.
    pub fn with_options(factory: F, options: RegistryOptions) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            slots: Arc::new(SessionSlots::new(options.max_sessions)),
            factory,
            ids: Box::new(UuidGenerator),
            options,
        }
    }

    /// Replaces the session id generator.
    pub fn with_id_generator(mut self, ids: impl IdGenerator) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Returns the registry options.
    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Looks up a session that has not reached a terminal state.
    fn live(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        let session = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if session.state().is_terminal() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        Ok(session)
    }
}

impl<F: ClientFactory> SessionGateway for SessionRegistry<F> {
    fn start(&self, params: ConnectParams) -> Result<(SessionId, Readiness), SessionError> {
        if let Err(live) = self.slots.claim() {
            tracing::warn!(live, max = self.options.max_sessions, "Session limit reached");
            return Err(SessionError::LimitReached(live));
        }

        let session_id = self.ids.next_id();
        let (session, commands) = Session::new(session_id.clone(), &params);
        let session = Arc::new(session);

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => {
                self.slots.release();
                return Err(SessionError::IdInUse(session_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
            }
        }

        let (readiness, ready_tx) = Readiness::new(session_id.clone());

        tracing::info!(
            session_id = %session_id,
            host = %params.host,
            port = params.port,
            username = %params.username,
            "Starting session"
        );

        let driver = Driver {
            sessions: Arc::clone(&self.sessions),
            slots: Arc::clone(&self.slots),
            session,
            client: self.factory.create(),
            params,
            pty: self.options.pty.clone(),
            connect_timeout: self.options.connect_timeout,
            ready_tx,
            commands,
        };
        tokio::spawn(driver.run());

        Ok((session_id, readiness))
    }

    fn subscribe(
        &self,
        session_id: &str,
        subscriber: &Arc<dyn Subscriber>,
    ) -> Result<(), SessionError> {
        let session = self.live(session_id)?;

        for entry in self.sessions.iter() {
            if entry.key().as_str() != session_id && entry.value().subscribers.detach(subscriber) {
                tracing::debug!(
                    from = %entry.key(),
                    to = %session_id,
                    "Moved subscriber between sessions"
                );
            }
        }

        if !session.subscribers.attach(subscriber) {
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        tracing::debug!(
            session_id = %session_id,
            subscribers = session.subscribers.len(),
            "Subscriber attached to session"
        );
        Ok(())
    }

    fn unsubscribe(&self, session_id: &str, subscriber: &Arc<dyn Subscriber>) {
        let Some(session) = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return;
        };

        if session.subscribers.detach(subscriber) {
            tracing::debug!(session_id = %session_id, "Subscriber detached from session");
        }
    }

    fn write(&self, session_id: &str, data: &[u8]) -> Result<(), SessionError> {
        let session = self.live(session_id)?;
        session.submit(Command::Write(Bytes::copy_from_slice(data)))
    }

    fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        if cols == 0 || rows == 0 {
            return Err(SessionError::InvalidSize { cols, rows });
        }
        let session = self.live(session_id)?;
        session.submit(Command::Resize { cols, rows })?;

        tracing::debug!(session_id = %session_id, cols, rows, "Resize queued");
        Ok(())
    }

    fn close(&self, session_id: &str) {
        let Some(session) = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            tracing::debug!(session_id = %session_id, "Close for unknown session ignored");
            return;
        };

        teardown(
            &self.sessions,
            &self.slots,
            &session,
            SessionState::Closed,
            None,
        );
    }

    fn close_all(&self) {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.close(&id);
        }
    }

    fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions.iter().map(|session| session.info()).collect()
    }

    fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .map(|session| session.info())
    }

    fn exists(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    fn count(&self) -> usize {
        self.sessions.len()
    }
}
