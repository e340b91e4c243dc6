//! Token refresh tests
//!
//! Single-flight coalescing, bounded attempts and sign-out on rejection.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use mockito::{Matcher, Server};
use mediagate::auth::{NoopHandoff, RefreshSettings};
use mediagate::models::{CredentialBundle, User};
use mediagate::resilience::RetryPolicy;
use mediagate::{App, MemoryStorage, SecureStorage, Settings};

const USER_JSON: &str = r#"{"id":"u1","username":"ana","isAdmin":false}"#;

fn signed_in(server_url: &str) -> (App, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::with_entries([
        ("mediagate.server_url", server_url),
        ("mediagate.user", USER_JSON),
        ("mediagate.access_token", "old-token"),
        ("mediagate.session_id", "s1"),
    ]));
    let settings = Settings {
        retry: RetryPolicy::new(3).with_base_delay(Duration::from_millis(1)),
        refresh: RefreshSettings {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
        },
        ..Settings::default()
    };
    let app = App::new(settings, storage.clone(), Arc::new(NoopHandoff));
    (app, storage)
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_request() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"accessToken":"new-token"}"#)
        .expect(1)
        .create_async()
        .await;

    let (app, storage) = signed_in(&server.url());
    let results = join_all((0..10).map(|_| app.refresh_token())).await;

    mock.assert_async().await;
    assert!(results.iter().all(|ok| *ok));
    assert_eq!(
        storage.get("mediagate.access_token").unwrap().as_deref(),
        Some("new-token")
    );
}

#[tokio::test]
async fn test_sequential_refreshes_each_hit_the_server() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"accessToken":"new-token"}"#)
        .expect(2)
        .create_async()
        .await;

    let (app, _) = signed_in(&server.url());
    assert!(app.refresh_token().await);
    assert!(app.refresh_token().await);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_rotated_session_and_user_are_installed() {
    let mut server = Server::new_async().await;

    server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{
                "accessToken": "new-token",
                "sessionId": "s2",
                "user": {"id":"u1","username":"ana","displayName":"Ana","isAdmin":true}
            }"#,
        )
        .create_async()
        .await;

    let (app, storage) = signed_in(&server.url());
    assert!(app.refresh_token().await);

    let user = app.current_user().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Ana"));
    assert!(user.is_admin);
    assert_eq!(
        storage.get("mediagate.session_id").unwrap().as_deref(),
        Some("s2")
    );
}

#[tokio::test]
async fn test_rejected_refresh_clears_credentials() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let (app, storage) = signed_in(&server.url());
    assert!(!app.refresh_token().await);

    mock.assert_async().await;
    assert!(!app.is_authenticated());
    assert_eq!(storage.get("mediagate.access_token").unwrap(), None);
    assert_eq!(storage.get("mediagate.user").unwrap(), None);
}

#[tokio::test]
async fn test_refresh_gives_up_after_max_attempts() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let (app, _) = signed_in(&server.url());
    assert!(!app.refresh_token().await);

    mock.assert_async().await;
    assert!(!app.is_authenticated());
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let mut server = Server::new_async().await;

    let failing = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(502)
        .expect(1)
        .create_async()
        .await;
    let succeeding = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"accessToken":"new-token"}"#)
        .expect(1)
        .create_async()
        .await;

    let (app, _) = signed_in(&server.url());
    assert!(app.refresh_token().await);

    failing.assert_async().await;
    succeeding.assert_async().await;
    assert!(app.is_authenticated());
}

#[tokio::test]
async fn test_refresh_without_session_sends_nothing() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let settings = Settings {
        server_url: Some(server.url()),
        ..Settings::default()
    };
    let app = App::new(settings, Arc::new(MemoryStorage::new()), Arc::new(NoopHandoff));
    assert!(!app.refresh_token().await);

    mock.assert_async().await;
}

// =============================================================================
// Session Replaced During Refresh
// =============================================================================

fn other_user_bundle(server_url: &str) -> CredentialBundle {
    CredentialBundle {
        server_url: server_url.to_string(),
        user: User {
            id: "u2".into(),
            username: "bob".into(),
            display_name: None,
            is_admin: false,
        },
        access_token: "bob-token".into(),
        session_id: "s-bob".into(),
    }
}

/// Sign out and sign another user in while the refresh is still out
async fn switch_user_midway(app: &App, server_url: &str) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    app.sign_out().unwrap();
    app.client()
        .transport()
        .store()
        .save(other_user_bundle(server_url))
        .unwrap();
}

#[tokio::test]
async fn test_renewal_for_replaced_session_is_discarded() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::UrlEncoded("sessionId".into(), "s1".into()))
        .match_header("authorization", "Bearer old-token")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(300));
            w.write_all(br#"{"accessToken":"renewed-old-session","sessionId":"s1-next"}"#)
        })
        .expect(1)
        .create_async()
        .await;

    let url = server.url();
    let (app, storage) = signed_in(&url);
    let (refreshed, ()) = tokio::join!(app.refresh_token(), switch_user_midway(&app, &url));

    mock.assert_async().await;
    assert!(!refreshed);
    assert_eq!(
        app.subscribe_session().borrow().clone(),
        Some(other_user_bundle(&url))
    );
    assert_eq!(
        storage.get("mediagate.access_token").unwrap().as_deref(),
        Some("bob-token")
    );
    assert_eq!(
        storage.get("mediagate.session_id").unwrap().as_deref(),
        Some("s-bob")
    );
}

#[tokio::test]
async fn test_rejection_for_replaced_session_keeps_new_one() {
    let mut server = Server::new_async().await;

    server
        .mock("POST", "/api/auth/refresh-token")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(300));
            w.write_all(b"")
        })
        .create_async()
        .await;

    let url = server.url();
    let (app, storage) = signed_in(&url);
    let (refreshed, ()) = tokio::join!(app.refresh_token(), switch_user_midway(&app, &url));

    assert!(!refreshed);
    assert_eq!(app.current_user().map(|u| u.username).as_deref(), Some("bob"));
    assert_eq!(
        storage.get("mediagate.access_token").unwrap().as_deref(),
        Some("bob-token")
    );
}
