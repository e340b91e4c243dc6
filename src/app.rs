//! App facade
//!
//! Wires the session store, transport, breaker, refresh manager, health
//! monitor, resilient client and login orchestrator together, and exposes
//! the small surface a UI (or the CLI) needs.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, Transport};
use crate::auth::{AuthOrchestrator, Handoff, TokenRefreshManager};
use crate::config::Settings;
use crate::health::ServerHealthMonitor;
use crate::models::{CredentialBundle, FlowState, LoginSession, PairingSession, ServerHealth, User};
use crate::resilience::CircuitBreaker;
use crate::session::{SecureStorage, SessionStore};

/// Everything needed to talk to one media server as one signed-in user
pub struct App {
    store: Arc<SessionStore>,
    client: Arc<ApiClient>,
    refresher: TokenRefreshManager,
    health: ServerHealthMonitor,
    auth: AuthOrchestrator,
}

impl App {
    pub fn new(
        settings: Settings,
        storage: Arc<dyn SecureStorage>,
        handoff: Arc<dyn Handoff>,
    ) -> Self {
        let store = Arc::new(SessionStore::open(storage));
        let transport = Arc::new(Transport::new(
            settings.server_url.clone(),
            store.clone(),
            settings.request_timeout,
        ));
        let breaker = Arc::new(CircuitBreaker::new(settings.breaker));
        let refresher = TokenRefreshManager::new(transport.clone(), settings.refresh);
        let health = ServerHealthMonitor::new(transport.clone(), settings.retry, settings.health);
        let client = Arc::new(ApiClient::new(
            transport,
            breaker,
            settings.retry,
            refresher.clone(),
            health.clone(),
        ));
        let auth = AuthOrchestrator::new(client.clone(), store.clone(), handoff, settings.auth);

        debug!(
            server = ?client.transport().server_url(),
            signed_in = store.is_authenticated(),
            "App initialized"
        );

        Self {
            store,
            client,
            refresher,
            health,
            auth,
        }
    }

    pub fn current_user(&self) -> Option<User> {
        self.store.current().map(|bundle| bundle.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn is_server_down(&self) -> bool {
        self.health.is_server_down()
    }

    pub fn server_status_message(&self) -> Option<String> {
        self.health.status_message()
    }

    pub fn server_url(&self) -> Option<String> {
        self.client.transport().server_url()
    }

    pub async fn sign_in_with_provider(&self, provider_id: &str) -> Result<LoginSession, ApiError> {
        self.auth.sign_in_with_provider(provider_id).await
    }

    pub async fn sign_in_with_qr_code(&self) -> Result<PairingSession, ApiError> {
        self.auth.sign_in_with_qr_code().await
    }

    pub async fn poll_qr_authentication(&self, qr_session_id: &str) -> Result<User, ApiError> {
        self.auth.poll_qr_authentication(qr_session_id).await
    }

    /// Wait for whichever login flow is running
    pub async fn wait_for_login(&self) -> Result<User, ApiError> {
        self.auth.wait_for_completion().await
    }

    pub fn cancel_qr_authentication(&self) -> bool {
        self.auth.cancel_qr_authentication()
    }

    pub fn sign_out(&self) -> Result<(), ApiError> {
        self.auth.sign_out()
    }

    pub async fn refresh_user_status(&self) -> Result<Option<User>, ApiError> {
        self.auth.refresh_user_status().await
    }

    /// Force a token refresh. Returns whether a fresh token is installed.
    pub async fn refresh_token(&self) -> bool {
        self.refresher.refresh().await
    }

    /// App returned to the foreground: re-validate the session and the server
    pub async fn handle_foreground(&self) {
        if self.store.is_authenticated() {
            if let Err(e) = self.refresh_user_status().await {
                warn!(error = %e, "Could not refresh user status on foreground");
            }
        }
        self.health.probe_now();
    }

    /// One immediate health probe
    pub async fn check_health(&self) -> ServerHealth {
        self.health.check_now().await
    }

    pub fn client_id(&self) -> Result<String, ApiError> {
        Ok(self.store.get_or_create_client_id()?)
    }

    pub fn flow_state(&self) -> FlowState {
        self.auth.state()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Option<CredentialBundle>> {
        self.store.subscribe()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<ServerHealth> {
        self.health.subscribe()
    }

    pub fn subscribe_flow_state(&self) -> watch::Receiver<FlowState> {
        self.auth.subscribe_state()
    }

    /// Resilient client for arbitrary authenticated requests
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    pub fn health(&self) -> &ServerHealthMonitor {
        &self.health
    }

    pub fn auth(&self) -> &AuthOrchestrator {
        &self.auth
    }

    /// Cancel every login poll, probe and recovery timer
    pub fn shutdown(&self) {
        self.auth.shutdown();
        self.health.shutdown();
        debug!("App shut down");
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
