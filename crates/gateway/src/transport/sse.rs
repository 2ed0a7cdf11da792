//! Push-stream transport.
//!
//! `GET /api/ssh/stream?id=` attaches a [`QueueSubscriber`] to the session
//! and streams its events as Server-Sent-Events records. The subscriber is
//! attached before the first byte is written and detached when the client
//! goes away. A client that falls behind gets one final `error` event and
//! the stream ends.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use protocol::{SseRecord, StreamEvent};
use serde::Deserialize;
use super::queue::{QueueReceiver, QueueSubscriber};
use crate::server::{ApiError, AppState};
use crate::session::{SessionGateway, SessionId, Subscriber};

/// Query string of the stream route.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub id: Option<String>,
}

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Detaches the subscriber when the response body is dropped.
struct Attachment {
    gateway: Arc<dyn SessionGateway>,
    session_id: SessionId,
    queue: Arc<QueueSubscriber>,
    subscriber: Arc<dyn Subscriber>,
    events: QueueReceiver,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.gateway.unsubscribe(&self.session_id, &self.subscriber);
        tracing::debug!(
            session_id = %self.session_id,
            events_sent = self.queue.events_sent(),
            overflowed = self.queue.is_overflowed(),
            "Push stream detached"
        );
    }
}

/// Converts a session event into an SSE record.
pub fn sse_event(event: &StreamEvent) -> Event {
    let record = SseRecord::from_event(event);
    let mut sse = Event::default();
    if let Some(name) = record.event {
        sse = sse.event(name);
    }
    sse.data(record.data)
}

/// `GET /api/ssh/stream?id=`
pub async fn stream(State(state): State<AppState>, Query(query): Query<StreamQuery>) -> Response {
    let Some(session_id) = query.id.filter(|id| !id.is_empty()) else {
        return ApiError::validation("Missing id").into_response();
    };

    let (queue, events) = QueueSubscriber::new("sse", state.settings.subscriber_capacity);
    let subscriber = queue.as_subscriber();

    let body: EventStream = match state.gateway.subscribe(&session_id, &subscriber) {
        Ok(()) => {
            tracing::debug!(session_id = %session_id, "Push stream attached");
            let attachment = Attachment {
                gateway: Arc::clone(&state.gateway),
                session_id,
                queue,
                subscriber,
                events,
            };
            let connected = stream::once(async { Ok(Event::default().comment("connected")) });
            let output = stream::unfold(attachment, |mut attachment| async move {
                let event = attachment.events.recv().await?;
                Some((Ok(sse_event(&event)), attachment))
            });
            connected
                .chain(output)
                .take_until(state.shutdown.clone().cancelled_owned())
                .boxed()
        }
        Err(e) => {
            tracing::debug!(
                session_id = %session_id,
                error = %e,
                "Push stream for unknown session"
            );
            let event = sse_event(&StreamEvent::error(e.to_string()));
            stream::once(async move { Ok(event) }).boxed()
        }
    };

    Sse::new(body)
        .keep_alive(KeepAlive::new().interval(state.settings.keep_alive))
        .into_response()
}

