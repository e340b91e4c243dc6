//! Resilient client tests
//!
//! Credential attachment, 401 refresh-and-replay, retries with backoff,
//! per-endpoint circuit breaking and error classification.

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};
use mediagate::api::{ApiError, ApiRequest};
use mediagate::auth::{AuthSettings, NoopHandoff, RefreshSettings};
use mediagate::health::HealthSettings;
use mediagate::resilience::{BreakerSettings, CircuitState, RetryPolicy};
use mediagate::{App, MemoryStorage, Settings};

const USER_JSON: &str = r#"{"id":"u1","username":"ana","isAdmin":false}"#;

fn fast_settings(server_url: Option<String>, retry: RetryPolicy) -> Settings {
    Settings {
        server_url,
        request_timeout: Duration::from_secs(5),
        retry,
        breaker: BreakerSettings::default(),
        refresh: RefreshSettings {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
        },
        health: HealthSettings {
            debounce_window: Duration::from_millis(200),
            settle_delay: Duration::from_millis(20),
            recovery_interval: Duration::from_secs(60),
        },
        auth: AuthSettings::default(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3).with_base_delay(Duration::from_millis(1))
}

fn signed_in_app(server_url: &str, retry: RetryPolicy) -> App {
    let storage = Arc::new(MemoryStorage::with_entries([
        ("mediagate.server_url", server_url),
        ("mediagate.user", USER_JSON),
        ("mediagate.access_token", "old-token"),
        ("mediagate.session_id", "s1"),
    ]));
    App::new(fast_settings(None, retry), storage, Arc::new(NoopHandoff))
}

fn access_token(app: &App) -> Option<String> {
    app.subscribe_session()
        .borrow()
        .as_ref()
        .map(|b| b.access_token.clone())
}

// =============================================================================
// Credential Attachment
// =============================================================================

#[tokio::test]
async fn test_attaches_session_header_query_and_bearer() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/api/library/items")
        .match_header("x-session-id", "s1")
        .match_header("authorization", "Bearer old-token")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("sessionId".into(), "s1".into()),
            Matcher::UrlEncoded("limit".into(), "10".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items":[]}"#)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());
    let response = app
        .client()
        .request(ApiRequest::get("/api/library/items").query("limit", "10"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, r#"{"items":[]}"#);
}

#[tokio::test]
async fn test_signed_out_request_carries_no_credentials() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/api/public")
        .match_header("authorization", Matcher::Missing)
        .match_header("x-session-id", Matcher::Missing)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let app = App::new(
        fast_settings(Some(server.url()), fast_retry()),
        Arc::new(MemoryStorage::new()),
        Arc::new(NoopHandoff),
    );
    app.client()
        .request(ApiRequest::get("/api/public"))
        .await
        .unwrap();

    mock.assert_async().await;
}

fn app_signed_in_elsewhere(configured: &str) -> App {
    let storage = Arc::new(MemoryStorage::with_entries([
        ("mediagate.server_url", "http://server-a.local"),
        ("mediagate.user", USER_JSON),
        ("mediagate.access_token", "token-for-server-a"),
        ("mediagate.session_id", "s1"),
    ]));
    App::new(
        fast_settings(Some(configured.to_string()), fast_retry()),
        storage,
        Arc::new(NoopHandoff),
    )
}

#[tokio::test]
async fn test_credentials_not_sent_to_another_server() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/api/library/items")
        .match_header("authorization", Matcher::Missing)
        .match_header("x-session-id", Matcher::Missing)
        .match_query(Matcher::Missing)
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let app = app_signed_in_elsewhere(&server.url());
    app.client()
        .request(ApiRequest::get("/api/library/items"))
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_401_from_another_server_keeps_session() {
    let mut server = Server::new_async().await;

    server
        .mock("GET", "/api/library/items")
        .match_query(Matcher::Any)
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let app = app_signed_in_elsewhere(&server.url());
    let err = app
        .client()
        .request(ApiRequest::get("/api/library/items"))
        .await
        .unwrap_err();

    refresh.assert_async().await;
    assert!(matches!(err, ApiError::Auth));
    assert_eq!(
        access_token(&app).as_deref(),
        Some("token-for-server-a")
    );
}

#[tokio::test]
async fn test_no_server_configured() {
    let app = App::new(
        fast_settings(None, fast_retry()),
        Arc::new(MemoryStorage::new()),
        Arc::new(NoopHandoff),
    );
    let err = app
        .client()
        .request(ApiRequest::get("/api/anything"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NoServer));
}

// =============================================================================
// Token Refresh
// =============================================================================

#[tokio::test]
async fn test_refreshes_once_on_401_and_replays() {
    let mut server = Server::new_async().await;

    let stale = server
        .mock("GET", "/api/library/items")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer old-token")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer old-token")
        .with_status(200)
        .with_body(r#"{"accessToken":"new-token"}"#)
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", "/api/library/items")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer new-token")
        .with_status(200)
        .with_body(r#"{"items":[1]}"#)
        .expect(1)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());
    let response = app
        .client()
        .request(ApiRequest::get("/api/library/items"))
        .await
        .unwrap();

    stale.assert_async().await;
    refresh.assert_async().await;
    fresh.assert_async().await;
    assert_eq!(response.body, r#"{"items":[1]}"#);
    assert_eq!(access_token(&app).as_deref(), Some("new-token"));
    assert_eq!(app.current_user().map(|u| u.username).as_deref(), Some("ana"));
}

#[tokio::test]
async fn test_second_401_surfaces_auth_error() {
    let mut server = Server::new_async().await;

    let denied = server
        .mock("GET", "/api/admin")
        .match_query(Matcher::Any)
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"accessToken":"new-token"}"#)
        .expect(1)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());
    let err = app
        .client()
        .request(ApiRequest::get("/api/admin"))
        .await
        .unwrap_err();

    denied.assert_async().await;
    refresh.assert_async().await;
    assert!(matches!(err, ApiError::Auth));
    // The refresh itself succeeded, so the session stays
    assert!(app.is_authenticated());
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() {
    let mut server = Server::new_async().await;

    server
        .mock("GET", "/api/library/items")
        .match_query(Matcher::Any)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());
    let err = app
        .client()
        .request(ApiRequest::get("/api/library/items"))
        .await
        .unwrap_err();

    refresh.assert_async().await;
    assert!(matches!(err, ApiError::Auth));
    assert!(!app.is_authenticated());
    assert!(app.current_user().is_none());
}

#[tokio::test]
async fn test_skip_auth_refresh_returns_401_directly() {
    let mut server = Server::new_async().await;

    server
        .mock("GET", "/api/auth/check-token/abc")
        .match_query(Matcher::Any)
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());
    let err = app
        .client()
        .request(ApiRequest::get("/api/auth/check-token/abc").without_auth_refresh())
        .await
        .unwrap_err();

    refresh.assert_async().await;
    assert!(matches!(err, ApiError::Auth));
    assert!(app.is_authenticated());
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_retries_server_errors_then_succeeds() {
    let mut server = Server::new_async().await;

    let failing = server
        .mock("GET", "/api/library/items")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(2)
        .create_async()
        .await;
    let recovered = server
        .mock("GET", "/api/library/items")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());
    let response = app
        .client()
        .request(ApiRequest::get("/api/library/items"))
        .await
        .unwrap();

    failing.assert_async().await;
    recovered.assert_async().await;
    assert_eq!(response.status, 200);
    // Success closes the circuit and forgets the failures
    assert_eq!(app.client().breaker().failure_count("/api/library/items"), 0);
}

#[tokio::test]
async fn test_retries_exhausted_returns_server_error() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/api/library/items")
        .match_query(Matcher::Any)
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());
    let err = app
        .client()
        .request(ApiRequest::get("/api/library/items"))
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, ApiError::ServerError(500)));
    assert_eq!(app.client().breaker().failure_count("/api/library/items"), 3);
}

#[tokio::test]
async fn test_network_error_is_retried() {
    // Nothing listens on port 1
    let app = signed_in_app("http://127.0.0.1:1", fast_retry());
    let err = app
        .client()
        .request(ApiRequest::get("/api/library/items"))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Network(_)));
    assert!(err.is_server_unavailable());
    assert_eq!(app.client().breaker().failure_count("/api/library/items"), 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/api/library/items/42")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(r#"{"message":"No such item"}"#)
        .expect(1)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());
    let err = app
        .client()
        .request(ApiRequest::get("/api/library/items/42"))
        .await
        .unwrap_err();

    mock.assert_async().await;
    match err {
        ApiError::ClientError { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "No such item");
        }
        other => panic!("Expected ClientError, got {:?}", other),
    }
    assert_eq!(
        app.client().breaker().state("/api/library/items/42"),
        CircuitState::Closed
    );
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[tokio::test]
async fn test_circuit_opens_after_five_failures() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/api/library/items")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(5)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), RetryPolicy::no_retry());
    for _ in 0..5 {
        let err = app
            .client()
            .request(ApiRequest::get("/api/library/items"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ServerError(503)));
    }

    // Sixth call fails fast without touching the network
    let err = app
        .client()
        .request(ApiRequest::get("/api/library/items"))
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, ApiError::CircuitOpen(ref key) if key == "/api/library/items"));
    assert_eq!(
        app.client().breaker().state("/api/library/items"),
        CircuitState::Open
    );
}

#[tokio::test]
async fn test_circuit_opening_mid_call_stops_its_retries() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", "/api/library/recent")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(5)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), fast_retry());

    // Three attempts: failures 1..=3
    let err = app
        .client()
        .request(ApiRequest::get("/api/library/recent"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ServerError(503)));
    assert_eq!(app.client().breaker().failure_count("/api/library/recent"), 3);

    // Failures 4 and 5 open the circuit; the third attempt never goes out
    let err = app
        .client()
        .request(ApiRequest::get("/api/library/recent"))
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, ApiError::CircuitOpen(ref key) if key == "/api/library/recent"));
    assert_eq!(
        app.client().breaker().state("/api/library/recent"),
        CircuitState::Open
    );
}

#[tokio::test]
async fn test_circuit_is_per_endpoint() {
    let mut server = Server::new_async().await;

    server
        .mock("GET", "/api/broken")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;
    let healthy = server
        .mock("GET", "/api/working")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), RetryPolicy::no_retry());
    for _ in 0..5 {
        let _ = app.client().request(ApiRequest::get("/api/broken")).await;
    }
    assert!(app.client().breaker().is_open("/api/broken"));

    app.client()
        .request(ApiRequest::get("/api/working"))
        .await
        .unwrap();
    healthy.assert_async().await;
}

#[tokio::test]
async fn test_query_string_shares_the_endpoint_circuit() {
    let mut server = Server::new_async().await;

    server
        .mock("GET", "/api/search")
        .match_query(Matcher::Any)
        .with_status(502)
        .create_async()
        .await;

    let app = signed_in_app(&server.url(), RetryPolicy::no_retry());
    for page in 0..5 {
        let _ = app
            .client()
            .request(ApiRequest::get(format!("/api/search?page={}", page)))
            .await;
    }

    let err = app
        .client()
        .request(ApiRequest::get("/api/search?page=9"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::CircuitOpen(_)));
}
