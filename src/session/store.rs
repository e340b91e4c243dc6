//! Session store
//!
//! Sole owner of the credential bundle. `save` and `clear` are the only
//! writers; every other component reads the bundle through `current()` at
//! the moment it needs it, so a refresh or sign-out is visible to the very
//! next request.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::storage::{SecureStorage, StorageError};
use crate::models::{CredentialBundle, User};

const KEY_SERVER_URL: &str = "mediagate.server_url";
const KEY_USER: &str = "mediagate.user";
const KEY_ACCESS_TOKEN: &str = "mediagate.access_token";
const KEY_SESSION_ID: &str = "mediagate.session_id";
const KEY_CLIENT_ID: &str = "mediagate.client_id";

const BUNDLE_KEYS: [&str; 4] = [KEY_SERVER_URL, KEY_USER, KEY_ACCESS_TOKEN, KEY_SESSION_ID];

/// Persists the credential bundle and the installation's client id
pub struct SessionStore {
    storage: Arc<dyn SecureStorage>,
    current: watch::Sender<Option<CredentialBundle>>,
    client_id: Mutex<Option<String>>,
    /// Serializes bundle writers so a compare-and-write sees no interleaving
    writes: Mutex<()>,
}

impl SessionStore {
    /// Open the store and load whatever bundle storage holds
    pub fn open(storage: Arc<dyn SecureStorage>) -> Self {
        let (current, _) = watch::channel(None);
        let store = Self {
            storage,
            current,
            client_id: Mutex::new(None),
            writes: Mutex::new(()),
        };
        let loaded = store.load();
        store.current.send_replace(loaded);
        store
    }

    /// Read the bundle from durable storage.
    ///
    /// Anything short of a complete, well-formed bundle reads as signed out.
    /// Leftover keys of a partial bundle are removed.
    pub fn load(&self) -> Option<CredentialBundle> {
        let values = match BUNDLE_KEYS
            .iter()
            .map(|key| self.storage.get(key))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Could not read stored credentials, starting signed out");
                return None;
            }
        };

        let present = values.iter().filter(|v| v.is_some()).count();
        if present == 0 {
            return None;
        }

        let bundle = match values.as_slice() {
            [Some(server_url), Some(user), Some(token), Some(session_id)] => {
                serde_json::from_str::<User>(user)
                    .ok()
                    .filter(|_| !token.is_empty() && !session_id.is_empty())
                    .map(|user| CredentialBundle {
                        server_url: server_url.clone(),
                        user,
                        access_token: token.clone(),
                        session_id: session_id.clone(),
                    })
            }
            _ => None,
        };

        if bundle.is_none() {
            warn!(present, "Stored credentials are incomplete, discarding them");
            self.delete_bundle_keys();
        }
        bundle
    }

    /// Persist a new bundle and make it the current one
    pub fn save(&self, bundle: CredentialBundle) -> Result<(), StorageError> {
        let _guard = self.write_lock();
        self.write_bundle(bundle)
    }

    /// Rewrite the current bundle with `update`, but only while `expected`'s
    /// session is still the current one. Returns `Ok(false)` and leaves
    /// storage untouched when the user signed out or another session was
    /// saved in the meantime.
    pub fn update_if_current<F>(&self, expected: &CredentialBundle, update: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&CredentialBundle) -> CredentialBundle,
    {
        let _guard = self.write_lock();
        let Some(current) = self.current().filter(|c| c.same_session(expected)) else {
            return Ok(false);
        };
        self.write_bundle(update(&current)).map(|()| true)
    }

    /// Sign out, but only while `expected`'s session is still the current one
    pub fn clear_if_current(&self, expected: &CredentialBundle) -> Result<bool, StorageError> {
        let _guard = self.write_lock();
        if !self.is_current(expected) {
            return Ok(false);
        }
        self.clear_bundle().map(|()| true)
    }

    fn is_current(&self, expected: &CredentialBundle) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|current| current.same_session(expected))
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_bundle(&self, bundle: CredentialBundle) -> Result<(), StorageError> {
        let user = serde_json::to_string(&bundle.user)?;
        let writes = [
            (KEY_SERVER_URL, bundle.server_url.as_str()),
            (KEY_USER, user.as_str()),
            (KEY_ACCESS_TOKEN, bundle.access_token.as_str()),
            (KEY_SESSION_ID, bundle.session_id.as_str()),
        ];
        for (key, value) in writes {
            if let Err(e) = self.storage.set(key, value) {
                // Never leave a half-written bundle behind
                self.delete_bundle_keys();
                self.current.send_replace(None);
                return Err(e);
            }
        }

        debug!(user = %bundle.user.username, "Credentials saved");
        self.current.send_replace(Some(bundle));
        Ok(())
    }

    /// Forget the bundle (sign out). The client id survives.
    ///
    /// The in-memory bundle is dropped even if storage fails.
    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock();
        self.clear_bundle()
    }

    fn clear_bundle(&self) -> Result<(), StorageError> {
        let had_bundle = self.current.send_replace(None).is_some();
        let mut result = Ok(());
        for key in BUNDLE_KEYS {
            if let Err(e) = self.storage.delete(key) {
                result = Err(e);
            }
        }
        if had_bundle {
            info!("Credentials cleared");
        }
        result
    }

    /// The current bundle, if signed in
    pub fn current(&self) -> Option<CredentialBundle> {
        self.current.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Observe bundle changes
    pub fn subscribe(&self) -> watch::Receiver<Option<CredentialBundle>> {
        self.current.subscribe()
    }

    /// Stable per-installation identifier, created and persisted on first use
    pub fn get_or_create_client_id(&self) -> Result<String, StorageError> {
        let mut cached = self.client_id.lock().map_err(|_| StorageError::Poisoned)?;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let id = match self.storage.get(KEY_CLIENT_ID)? {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                let id = Uuid::new_v4().to_string();
                self.storage.set(KEY_CLIENT_ID, &id)?;
                info!(client_id = %id, "Generated new client id");
                id
            }
        };
        *cached = Some(id.clone());
        Ok(id)
    }

    fn delete_bundle_keys(&self) {
        for key in BUNDLE_KEYS {
            if let Err(e) = self.storage.delete(key) {
                warn!(key, error = %e, "Failed to remove stored credential");
            }
        }
    }
}
