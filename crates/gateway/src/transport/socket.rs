//! Bidirectional socket transport.
//!
//! One WebSocket drives at most one session. The socket's subscriber is
//! attached as soon as the session is started, so a failed connect reaches
//! the client as one coded `error` message followed by `closed`. Dropping
//! the socket closes its session, as does a socket that falls behind its
//! session's output.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMessage, ErrorCode, EventKind, ServerMessage, StreamEvent};
use super::queue::{QueueReceiver, QueueSubscriber};
use crate::server::error::session_error_code;
use crate::server::{validate, AppState};
use crate::session::{Readiness, SessionError, SessionId, Subscriber};

type Sink = SplitSink<WebSocket, Message>;

/// The session a socket is driving.
struct Binding {
    id: SessionId,
    queue: Arc<QueueSubscriber>,
    subscriber: Arc<dyn Subscriber>,
    events: QueueReceiver,
}

/// Per-socket state.
#[derive(Default)]
struct SocketSession {
    binding: Option<Binding>,
    readiness: Option<Readiness>,
}

/// `GET /api/ssh/socket`
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_socket(socket, state))
}

async fn run_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut session = SocketSession::default();
    tracing::debug!("Socket connected");

    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.cancelled() => break,
            result = wait_ready(&mut session.readiness) => {
                session.readiness = None;
                let failed = result.is_err();
                if !send(&mut sink, &readiness_reply(result)).await {
                    break;
                }
                if failed {
                    session.binding = None;
                    if !send(&mut sink, &ServerMessage::Closed).await {
                        break;
                    }
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(&state, &mut session, text.as_str()) {
                        if !send(&mut sink, &reply).await {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Socket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
            event = next_event(&mut session.binding) => {
                let reply = match event {
                    Some(event) if event.kind == EventKind::Close => continue,
                    // Connect failures are reported through readiness with a code.
                    Some(event)
                        if event.kind == EventKind::Error && session.readiness.is_some() =>
                    {
                        continue
                    }
                    Some(event) => ServerMessage::from_event(&event),
                    None => {
                        if let Some(binding) = session.binding.take() {
                            if binding.queue.is_overflowed() {
                                state.gateway.unsubscribe(&binding.id, &binding.subscriber);
                                state.gateway.close(&binding.id);
                                tracing::warn!(
                                    session_id = %binding.id,
                                    events_sent = binding.queue.events_sent(),
                                    "Socket fell behind, session closed"
                                );
                            }
                        }
                        if let Some(readiness) = session.readiness.take() {
                            if !send(&mut sink, &readiness_reply(readiness.await)).await {
                                break;
                            }
                        }
                        ServerMessage::Closed
                    }
                };
                if !send(&mut sink, &reply).await {
                    break;
                }
            }
        }
    }

    if let Some(binding) = session.binding.take() {
        state.gateway.unsubscribe(&binding.id, &binding.subscriber);
        state.gateway.close(&binding.id);
        tracing::debug!(session_id = %binding.id, "Socket gone, session closed");
    }
    let _ = sink.close().await;
}

/// Applies one client message. Returns the immediate reply, if any.
fn handle_text(state: &AppState, session: &mut SocketSession, text: &str) -> Option<ServerMessage> {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => return Some(ServerMessage::error(ErrorCode::InvalidRequest, e.to_string())),
    };

    match message {
        ClientMessage::Start(request) => {
            if session.binding.is_some() || session.readiness.is_some() {
                return Some(ServerMessage::error(
                    ErrorCode::InvalidRequest,
                    "a session is already running on this socket",
                ));
            }
            let params = match validate::connect_params(request, state.settings.default_port) {
                Ok(params) => params,
                Err(e) => return Some(ServerMessage::error(e.code(), e.to_string())),
            };
            let (id, readiness) = match state.gateway.start(params) {
                Ok(started) => started,
                Err(e) => return Some(session_error(&e)),
            };

            let (queue, events) =
                QueueSubscriber::new("socket", state.settings.subscriber_capacity);
            let subscriber = queue.as_subscriber();
            if let Err(e) = state.gateway.subscribe(&id, &subscriber) {
                tracing::debug!(
                    session_id = %id,
                    error = %e,
                    "Session ended before socket attached"
                );
                subscriber.close();
            }
            session.binding = Some(Binding {
                id,
                queue,
                subscriber,
                events,
            });
            session.readiness = Some(readiness);
            None
        }
        ClientMessage::Input { data } => {
            let Some(binding) = session.binding.as_ref() else {
                return Some(unbound());
            };
            state
                .gateway
                .write(&binding.id, data.as_bytes())
                .err()
                .map(|e| session_error(&e))
        }
        ClientMessage::Resize { cols, rows } => {
            let Some(binding) = session.binding.as_ref() else {
                return Some(unbound());
            };
            let (cols, rows) = match validate::dimensions(Some(cols), Some(rows)) {
                Ok(size) => size,
                Err(e) => return Some(ServerMessage::error(e.code(), e.to_string())),
            };
            state
                .gateway
                .resize(&binding.id, cols, rows)
                .err()
                .map(|e| session_error(&e))
        }
        ClientMessage::Close => {
            let binding = session.binding.take()?;
            session.readiness = None;
            state.gateway.unsubscribe(&binding.id, &binding.subscriber);
            state.gateway.close(&binding.id);
            Some(ServerMessage::Closed)
        }
    }
}

fn readiness_reply(result: Result<SessionId, SessionError>) -> ServerMessage {
    match result {
        Ok(id) => ServerMessage::Started { id },
        Err(e) => session_error(&e),
    }
}

fn unbound() -> ServerMessage {
    ServerMessage::error(ErrorCode::NotFound, "no session on this socket")
}

fn session_error(error: &SessionError) -> ServerMessage {
    ServerMessage::error(session_error_code(error), error.to_string())
}

/// Waits for the bound session's readiness; pending when there is none.
async fn wait_ready(readiness: &mut Option<Readiness>) -> Result<SessionId, SessionError> {
    match readiness.as_mut() {
        Some(readiness) => readiness.await,
        None => std::future::pending().await,
    }
}

/// Next event of the bound session; pending when unbound.
async fn next_event(binding: &mut Option<Binding>) -> Option<StreamEvent> {
    match binding.as_mut() {
        Some(binding) => binding.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn send(sink: &mut Sink, message: &ServerMessage) -> bool {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode socket message");
            return true;
        }
    };
    sink.send(Message::Text(json.into())).await.is_ok()
}
