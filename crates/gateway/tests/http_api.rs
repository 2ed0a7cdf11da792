//! Request/response API tests against a live server.

mod common;

use std::time::Duration;

use common::{start_server, start_server_with, HANG_HOST, REJECT_HOST};
use gateway::{HttpSettings, RegistryOptions, SessionGateway};
use protocol::{Ack, ErrorBody, ErrorCode, SessionSummary, StartResponse};
use reqwest::StatusCode;
use serde_json::json;

async fn post(url: &str, body: serde_json::Value) -> reqwest::Response {
    reqwest::Client::new().post(url).json(&body).send().await.unwrap()
}

async fn start_session(server: &common::TestServer) -> String {
    let response = post(
        &server.url("/api/ssh/start"),
        json!({"host": "10.0.0.5", "username": "root", "password": "pw"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    response.json::<StartResponse>().await.unwrap().id
}

async fn error_of(response: reqwest::Response) -> (StatusCode, ErrorCode) {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap();
    (status, body.code)
}

#[tokio::test]
async fn test_health() {
    let server = start_server().await;
    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_start_returns_ready_session() {
    let server = start_server().await;
    let id = start_session(&server).await;

    let info = server.registry.get(&id).unwrap();
    assert_eq!(info.host, "10.0.0.5");
    assert_eq!(info.port, 22);
    assert_eq!(info.username, "root");
}

#[tokio::test]
async fn test_start_rejects_missing_host() {
    let server = start_server().await;
    let response = post(&server.url("/api/ssh/start"), json!({"username": "root"})).await;
    assert_eq!(
        error_of(response).await,
        (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest)
    );
    assert_eq!(server.registry.count(), 0);
}

#[tokio::test]
async fn test_start_rejects_malformed_json() {
    let server = start_server().await;
    let response = reqwest::Client::new()
        .post(server.url("/api/ssh/start"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(
        error_of(response).await,
        (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest)
    );
}

#[tokio::test]
async fn test_start_auth_failure() {
    let server = start_server().await;
    let response = post(
        &server.url("/api/ssh/start"),
        json!({"host": REJECT_HOST, "username": "root", "password": "wrong"}),
    )
    .await;
    assert_eq!(
        error_of(response).await,
        (StatusCode::BAD_GATEWAY, ErrorCode::ConnectFailed)
    );
    assert_eq!(server.registry.count(), 0);
}

#[tokio::test]
async fn test_start_connect_timeout() {
    let options = RegistryOptions {
        connect_timeout: Duration::from_millis(100),
        ..RegistryOptions::default()
    };
    let server = start_server_with(HttpSettings::default(), options).await;
    let response = post(
        &server.url("/api/ssh/start"),
        json!({"host": HANG_HOST, "username": "root"}),
    )
    .await;
    assert_eq!(
        error_of(response).await,
        (StatusCode::BAD_GATEWAY, ErrorCode::ConnectFailed)
    );
    assert_eq!(server.registry.count(), 0);
}

#[tokio::test]
async fn test_start_limit_reached() {
    let options = RegistryOptions {
        max_sessions: 1,
        ..RegistryOptions::default()
    };
    let server = start_server_with(HttpSettings::default(), options).await;
    start_session(&server).await;

    let response = post(
        &server.url("/api/ssh/start"),
        json!({"host": "10.0.0.6", "username": "root"}),
    )
    .await;
    assert_eq!(
        error_of(response).await,
        (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::LimitReached)
    );
}

#[tokio::test]
async fn test_input_and_resize_acknowledged() {
    let server = start_server().await;
    let id = start_session(&server).await;

    let response = post(&server.url("/api/ssh/input"), json!({"id": id, "data": "ls\n"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Ack>().await.unwrap(), Ack::OK);

    let response = post(
        &server.url("/api/ssh/resize"),
        json!({"id": id, "cols": 120, "rows": 40}),
    )
    .await;
    assert_eq!(response.json::<Ack>().await.unwrap(), Ack::OK);
}

#[tokio::test]
async fn test_input_unknown_session() {
    let server = start_server().await;
    let response = post(
        &server.url("/api/ssh/input"),
        json!({"id": "nope", "data": "ls\n"}),
    )
    .await;
    assert_eq!(
        error_of(response).await,
        (StatusCode::NOT_FOUND, ErrorCode::NotFound)
    );
}

#[tokio::test]
async fn test_input_requires_data() {
    let server = start_server().await;
    let id = start_session(&server).await;
    let response = post(&server.url("/api/ssh/input"), json!({"id": id})).await;
    assert_eq!(
        error_of(response).await,
        (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest)
    );
}

#[tokio::test]
async fn test_resize_rejects_bad_dimensions() {
    let server = start_server().await;
    let id = start_session(&server).await;

    for body in [
        json!({"id": id, "cols": 0, "rows": 24}),
        json!({"id": id, "cols": 80, "rows": -1}),
        json!({"id": id, "cols": 80}),
    ] {
        let response = post(&server.url("/api/ssh/resize"), body).await;
        assert_eq!(
            error_of(response).await,
            (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest)
        );
    }
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let server = start_server().await;
    let id = start_session(&server).await;

    for _ in 0..2 {
        let response = post(&server.url("/api/ssh/close"), json!({"id": id})).await;
        assert_eq!(response.json::<Ack>().await.unwrap(), Ack::OK);
    }
    assert!(!server.registry.exists(&id));

    let response = post(&server.url("/api/ssh/close"), json!({"id": "never-existed"})).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sessions_listing() {
    let server = start_server().await;
    let first = start_session(&server).await;
    let second = start_session(&server).await;

    let sessions: Vec<SessionSummary> = reqwest::get(server.url("/api/ssh/sessions"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(sessions.len(), 2);
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));
    assert!(sessions.iter().all(|s| s.state == "ready"));
}

#[tokio::test]
async fn test_token_gate() {
    let settings = HttpSettings {
        auth_token: Some("s3cret".to_string()),
        ..HttpSettings::default()
    };
    let server = start_server_with(settings, RegistryOptions::default()).await;
    let client = reqwest::Client::new();

    let response = client.get(server.url("/api/ssh/sessions")).send().await.unwrap();
    assert_eq!(
        error_of(response).await,
        (StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized)
    );

    let response = client
        .get(server.url("/api/ssh/sessions"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .get(server.url("/api/ssh/sessions"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(server.url("/api/ssh/sessions?token=s3cret"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Health stays open.
    let response = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
