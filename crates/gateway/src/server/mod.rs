//! HTTP gateway surface.
//!
//! A thin axum layer over [`SessionGateway`]: request/response routes, the
//! push stream and the socket transport, plus an optional bearer-token gate
//! on every `/api` route.

pub mod error;
pub mod routes;
pub mod validate;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::session::SessionGateway;
use crate::transport::{socket, sse};

pub use error::ApiError;

/// Settings for the HTTP surface.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Required bearer token; `None` leaves the API open.
    pub auth_token: Option<String>,
    /// Queue depth of each transport subscriber.
    pub subscriber_capacity: usize,
    /// Port used when a start request omits one.
    pub default_port: u16,
    /// Interval between push-stream keep-alive comments.
    pub keep_alive: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            auth_token: None,
            subscriber_capacity: 1024,
            default_port: 22,
            keep_alive: Duration::from_secs(15),
        }
    }
}

/// Shared state accessible by handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn SessionGateway>,
    pub settings: Arc<HttpSettings>,
    /// Cancelled when the server is shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(gateway: Arc<dyn SessionGateway>, settings: HttpSettings) -> Self {
        Self {
            gateway,
            settings: Arc::new(settings),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the axum router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/start", post(routes::start))
        .route("/input", post(routes::input))
        .route("/resize", post(routes::resize))
        .route("/close", post(routes::close))
        .route("/sessions", get(routes::sessions))
        .route("/stream", get(sse::stream))
        .route("/socket", get(socket::upgrade))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .nest("/api/ssh", api)
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router until `shutdown` resolves.
///
/// Once it does, live sockets are told to stop and every session is closed
/// so open streams end and the server can drain.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let gateway = Arc::clone(&state.gateway);
    let stop = state.shutdown.clone();
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!(sessions = gateway.count(), "Closing all sessions");
            stop.cancel();
            gateway.close_all();
        })
        .await
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = state.settings.auth_token.as_deref() {
        if presented_token(&request) != Some(expected) {
            tracing::warn!(path = %request.uri().path(), "Rejected request without valid token");
            return ApiError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}

/// Token from `Authorization: Bearer` or, for browser streams and sockets
/// that cannot set headers, the `token` query parameter.
fn presented_token(request: &Request) -> Option<&str> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if header.is_some() {
        return header;
    }

    request
        .uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, bearer: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_presented_token_from_header() {
        let req = request("/api/ssh/sessions", Some("s3cret"));
        assert_eq!(presented_token(&req), Some("s3cret"));
    }

    #[test]
    fn test_presented_token_from_query() {
        let req = request("/api/ssh/stream?id=abc&token=s3cret", None);
        assert_eq!(presented_token(&req), Some("s3cret"));
    }

    #[test]
    fn test_presented_token_missing() {
        let req = request("/api/ssh/stream?id=abc", None);
        assert_eq!(presented_token(&req), None);
    }

    #[test]
    fn test_default_settings() {
        let settings = HttpSettings::default();
        assert!(settings.auth_token.is_none());
        assert_eq!(settings.subscriber_capacity, 1024);
        assert_eq!(settings.default_port, 22);
    }
}
