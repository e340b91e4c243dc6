//! Session persistence tests
//!
//! Credentials and the client id survive restarts through `FileStorage`;
//! incomplete or damaged storage starts signed out.

use std::sync::Arc;

use mediagate::auth::NoopHandoff;
use mediagate::models::{CredentialBundle, User};
use mediagate::{App, FileStorage, SecureStorage, SessionStore, Settings};

fn bundle(server_url: &str) -> CredentialBundle {
    CredentialBundle {
        server_url: server_url.to_string(),
        user: User {
            id: "u1".into(),
            username: "ana".into(),
            display_name: Some("Ana".into()),
            is_admin: false,
        },
        access_token: "tok".into(),
        session_id: "s1".into(),
    }
}

#[test]
fn test_bundle_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let store = SessionStore::open(Arc::new(FileStorage::new(&path)));
    store.save(bundle("http://media.local")).unwrap();
    let client_id = store.get_or_create_client_id().unwrap();
    drop(store);

    let reopened = SessionStore::open(Arc::new(FileStorage::new(&path)));
    assert_eq!(reopened.current(), Some(bundle("http://media.local")));
    assert_eq!(reopened.get_or_create_client_id().unwrap(), client_id);
}

#[test]
fn test_sign_out_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let store = SessionStore::open(Arc::new(FileStorage::new(&path)));
    store.save(bundle("http://media.local")).unwrap();
    store.clear().unwrap();

    let reopened = SessionStore::open(Arc::new(FileStorage::new(&path)));
    assert!(!reopened.is_authenticated());
}

#[test]
fn test_partial_bundle_on_disk_starts_signed_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    std::fs::write(
        &path,
        r#"{"mediagate.server_url":"http://media.local","mediagate.access_token":"tok"}"#,
    )
    .unwrap();

    let storage = Arc::new(FileStorage::new(&path));
    let store = SessionStore::open(storage.clone());

    assert!(store.current().is_none());
    // Leftovers of the partial bundle are removed
    assert_eq!(storage.get("mediagate.access_token").unwrap(), None);
}

#[test]
fn test_corrupt_file_starts_signed_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    std::fs::write(&path, "not json at all").unwrap();

    let store = SessionStore::open(Arc::new(FileStorage::new(&path)));
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn test_app_restores_session_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mediagate").join("credentials.json");

    SessionStore::open(Arc::new(FileStorage::new(&path)))
        .save(bundle("http://media.local:8096"))
        .unwrap();

    let app = App::new(
        Settings::default(),
        Arc::new(FileStorage::new(&path)),
        Arc::new(NoopHandoff),
    );
    assert!(app.is_authenticated());
    assert_eq!(app.server_url().as_deref(), Some("http://media.local:8096"));
    assert_eq!(app.current_user().map(|u| u.to_string()).as_deref(), Some("Ana (ana)"));
}

#[tokio::test]
async fn test_configured_server_wins_over_stored_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    SessionStore::open(Arc::new(FileStorage::new(&path)))
        .save(bundle("http://old.local"))
        .unwrap();

    let settings = Settings {
        server_url: Some("http://new.local/".into()),
        ..Settings::default()
    };
    let app = App::new(settings, Arc::new(FileStorage::new(&path)), Arc::new(NoopHandoff));
    assert_eq!(app.server_url().as_deref(), Some("http://new.local"));
}
