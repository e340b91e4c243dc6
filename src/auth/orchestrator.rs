//! Login flow orchestration
//!
//! Both flows have the same shape:
//!
//! ```text
//! Idle → Registering → AwaitingCompletion → Completed | Expired | TimedOut | Cancelled
//! ```
//!
//! Registering creates a login (or pairing) session bound to the client id.
//! AwaitingCompletion polls the check endpoint until the server reports
//! `complete` or `expired`, or the wall-clock timeout runs out. Only one flow
//! exists per orchestrator; starting another cancels the current one first.
//! Cancelling a flow that is still Registering returns it to Idle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handoff::Handoff;
use crate::api::{endpoints, ApiClient, ApiError, ApiRequest};
use crate::models::{
    CheckStatus, CredentialBundle, FlowKind, FlowOutcome, FlowState, LoginSession,
    PairingSession, RegisterQrSessionRequest, RegisterSessionRequest, TokenCheckResponse, User,
    UserStatusResponse,
};
use crate::session::SessionStore;

/// Login flow timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    /// Spacing of token-check polls
    pub poll_interval: Duration,
    /// Wall-clock limit from registration to completion
    pub flow_timeout: Duration,
    /// Name announced when registering a pairing session
    pub device_name: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            flow_timeout: Duration::from_secs(5 * 60),
            device_name: None,
        }
    }
}

/// Owner of the provider-redirect and QR-pairing login flows
#[derive(Clone)]
pub struct AuthOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    client: Arc<ApiClient>,
    store: Arc<SessionStore>,
    handoff: Arc<dyn Handoff>,
    settings: AuthSettings,
    state: watch::Sender<FlowState>,
    flow: Mutex<Option<FlowRecord>>,
    next_flow_id: AtomicU64,
}

/// The current (or most recently finished) flow
struct FlowRecord {
    id: u64,
    kind: FlowKind,
    /// Login or pairing session id, once registered
    session_id: Option<String>,
    task: Option<JoinHandle<()>>,
    outcome: watch::Sender<Option<FlowOutcome>>,
}

impl FlowRecord {
    fn is_active(&self) -> bool {
        self.outcome.borrow().is_none()
    }
}

/// What a successful poll loop hands back
enum PollResult {
    Approved(CredentialBundle),
    Expired,
}

impl AuthOrchestrator {
    pub fn new(
        client: Arc<ApiClient>,
        store: Arc<SessionStore>,
        handoff: Arc<dyn Handoff>,
        settings: AuthSettings,
    ) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self {
            inner: Arc::new(OrchestratorInner {
                client,
                store,
                handoff,
                settings,
                state,
                flow: Mutex::new(None),
                next_flow_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> FlowState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FlowState> {
        self.inner.state.subscribe()
    }

    /// Kind of the flow currently awaiting completion, if any
    pub fn active_flow(&self) -> Option<FlowKind> {
        self.inner
            .flow_slot()
            .as_ref()
            .filter(|r| r.is_active())
            .map(|r| r.kind.clone())
    }

    /// Start a provider-redirect login: register a session, open the
    /// provider's page and poll for completion in the background.
    pub async fn sign_in_with_provider(&self, provider_id: &str) -> Result<LoginSession, ApiError> {
        let (flow_id, started) = self
            .inner
            .begin_flow(FlowKind::Provider(provider_id.to_string()));

        let registered = async {
            let server_url = self.inner.server_url()?;
            let client_id = self.inner.store.get_or_create_client_id()?;
            let body = RegisterSessionRequest {
                client_id: &client_id,
                provider_id,
            };
            let session: LoginSession = self
                .inner
                .client
                .request(
                    ApiRequest::post(endpoints::REGISTER_SESSION)
                        .json(&body)?
                        .without_auth_refresh(),
                )
                .await?
                .json()?;
            Ok::<_, ApiError>((server_url, session))
        }
        .await;

        let (server_url, session) = match registered {
            Ok(registered) => registered,
            Err(e) => {
                self.inner.abandon(flow_id);
                return Err(e);
            }
        };

        self.start_polling(
            flow_id,
            session.session_id.clone(),
            endpoints::check_token(&session.session_id),
            server_url,
            started,
        )?;
        info!(provider = provider_id, session = %session.session_id, "Login session registered");
        self.inner.handoff.open_handoff(&session.auth_url);
        Ok(session)
    }

    /// Start a QR-pairing login: register a pairing session and poll for
    /// completion in the background. The caller renders the pairing URL.
    pub async fn sign_in_with_qr_code(&self) -> Result<PairingSession, ApiError> {
        let (flow_id, started) = self.inner.begin_flow(FlowKind::QrCode);

        let registered = async {
            let server_url = self.inner.server_url()?;
            let client_id = self.inner.store.get_or_create_client_id()?;
            let body = RegisterQrSessionRequest {
                client_id: &client_id,
                device_name: self.inner.settings.device_name.as_deref(),
            };
            let session: PairingSession = self
                .inner
                .client
                .request(
                    ApiRequest::post(endpoints::REGISTER_QR_SESSION)
                        .json(&body)?
                        .without_auth_refresh(),
                )
                .await?
                .json()?;
            Ok::<_, ApiError>((server_url, session))
        }
        .await;

        let (server_url, session) = match registered {
            Ok(registered) => registered,
            Err(e) => {
                self.inner.abandon(flow_id);
                return Err(e);
            }
        };

        self.start_polling(
            flow_id,
            session.qr_session_id.clone(),
            endpoints::check_qr_token(&session.qr_session_id),
            server_url,
            started,
        )?;
        info!(session = %session.qr_session_id, "Pairing session registered");
        Ok(session)
    }

    /// Wait for the QR flow registered as `qr_session_id` to finish
    pub async fn poll_qr_authentication(&self, qr_session_id: &str) -> Result<User, ApiError> {
        let outcome = {
            let flow = self.inner.flow_slot();
            match flow.as_ref() {
                Some(record)
                    if record.kind == FlowKind::QrCode
                        && record.session_id.as_deref() == Some(qr_session_id) =>
                {
                    record.outcome.subscribe()
                }
                _ => return Err(ApiError::UnknownFlow(qr_session_id.to_string())),
            }
        };
        Self::await_outcome(outcome).await
    }

    /// Wait for the current flow, whichever kind, to finish
    pub async fn wait_for_completion(&self) -> Result<User, ApiError> {
        let outcome = match self.inner.flow_slot().as_ref() {
            Some(record) => record.outcome.subscribe(),
            None => return Err(ApiError::UnknownFlow("none".to_string())),
        };
        Self::await_outcome(outcome).await
    }

    /// Cancel the current QR flow. Returns whether one was running.
    pub fn cancel_qr_authentication(&self) -> bool {
        let is_qr = self
            .inner
            .flow_slot()
            .as_ref()
            .map(|r| r.kind == FlowKind::QrCode)
            .unwrap_or(false);
        is_qr && self.inner.cancel_active()
    }

    /// Cancel the current flow of any kind. Existing credentials are untouched.
    pub fn cancel(&self) -> bool {
        self.inner.cancel_active()
    }

    /// Cancel any flow, stop recovery polling and drop the credentials
    pub fn sign_out(&self) -> Result<(), ApiError> {
        self.inner.cancel_active();
        self.inner.flow_slot().take();
        self.inner.client.health().stop_recovery_polling();
        self.inner.state.send_replace(FlowState::Idle);
        self.inner.store.clear()?;
        info!("Signed out");
        Ok(())
    }

    /// Re-read the signed-in user's profile from the server.
    ///
    /// Returns `None` when signed out. A rejected session surfaces as
    /// `ApiError::Auth` after the refresh manager has cleared it.
    pub async fn refresh_user_status(&self) -> Result<Option<User>, ApiError> {
        let Some(started) = self.inner.client.transport().credentials() else {
            return Ok(None);
        };

        let status: UserStatusResponse = self.inner.client.get_json(endpoints::USER_STATUS).await?;

        // Only touch the session the profile was fetched for
        let still_current = match self.inner.store.current() {
            Some(current) if current.same_session(&started) && current.user != status.user => {
                debug!(user = %status.user.username, "User profile changed");
                self.inner.store.update_if_current(&started, |current| CredentialBundle {
                    user: status.user.clone(),
                    ..current.clone()
                })?
            }
            Some(current) => current.same_session(&started),
            None => false,
        };
        if !still_current {
            debug!("Session changed while fetching user status");
            return Ok(None);
        }
        Ok(Some(status.user))
    }

    /// Stop background work
    pub fn shutdown(&self) {
        self.inner.cancel_active();
    }

    fn start_polling(
        &self,
        flow_id: u64,
        session_id: String,
        check_path: String,
        server_url: String,
        started: Instant,
    ) -> Result<(), ApiError> {
        let mut flow = self.inner.flow_slot();
        let record = match flow.as_mut() {
            Some(record) if record.id == flow_id && record.is_active() => record,
            _ => {
                debug!(flow_id, "Flow cancelled during registration");
                return Err(ApiError::FlowCancelled);
            }
        };

        record.session_id = Some(session_id);
        self.inner.state.send_replace(FlowState::AwaitingCompletion);

        let deadline = tokio::time::Instant::from_std(started + self.inner.settings.flow_timeout);
        let inner = self.inner.clone();
        record.task = Some(tokio::spawn(async move {
            inner.poll_until_done(flow_id, check_path, server_url, deadline).await;
        }));
        Ok(())
    }

    async fn await_outcome(
        mut outcome: watch::Receiver<Option<FlowOutcome>>,
    ) -> Result<User, ApiError> {
        // Err only when the record was dropped without ever settling
        let settled = match outcome.wait_for(|o| o.is_some()).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        match settled {
            Some(FlowOutcome::Completed(user)) => Ok(user),
            Some(FlowOutcome::Expired) | Some(FlowOutcome::TimedOut) => {
                Err(ApiError::SessionExpired)
            }
            Some(FlowOutcome::Failed(reason)) => Err(ApiError::InvalidResponse(reason)),
            Some(FlowOutcome::Cancelled) | None => Err(ApiError::FlowCancelled),
        }
    }
}

impl OrchestratorInner {
    fn flow_slot(&self) -> MutexGuard<'_, Option<FlowRecord>> {
        self.flow.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn server_url(&self) -> Result<String, ApiError> {
        self.client.transport().server_url().ok_or(ApiError::NoServer)
    }

    /// Force-cancel the current flow and install a fresh one in Registering
    fn begin_flow(&self, kind: FlowKind) -> (u64, Instant) {
        self.cancel_active();

        let id = self.next_flow_id.fetch_add(1, Ordering::Relaxed);
        let (outcome, _) = watch::channel(None);
        debug!(flow_id = id, kind = %kind, "Starting login flow");
        *self.flow_slot() = Some(FlowRecord {
            id,
            kind,
            session_id: None,
            task: None,
            outcome,
        });
        self.state.send_replace(FlowState::Registering);
        (id, Instant::now())
    }

    /// Drop a flow whose registration failed
    fn abandon(&self, flow_id: u64) {
        let mut flow = self.flow_slot();
        if flow.as_ref().map(|r| r.id == flow_id && r.is_active()) == Some(true) {
            if let Some(record) = flow.take() {
                record.outcome.send_replace(Some(FlowOutcome::Cancelled));
            }
            self.state.send_replace(FlowState::Idle);
        }
    }

    fn cancel_active(&self) -> bool {
        let mut flow = self.flow_slot();
        let Some(record) = flow.as_mut().filter(|r| r.is_active()) else {
            return false;
        };
        if let Some(task) = record.task.take() {
            task.abort();
        }
        record.outcome.send_replace(Some(FlowOutcome::Cancelled));
        // A flow still registering never reached the server's side of the
        // handshake, so it falls back to Idle instead of Cancelled
        let state = if record.session_id.is_some() {
            FlowState::Cancelled
        } else {
            FlowState::Idle
        };
        self.state.send_replace(state);
        info!(flow_id = record.id, kind = %record.kind, state = ?state, "Login flow cancelled");
        true
    }

    async fn poll_until_done(
        &self,
        flow_id: u64,
        check_path: String,
        server_url: String,
        deadline: tokio::time::Instant,
    ) {
        let polling = async {
            loop {
                tokio::time::sleep(self.settings.poll_interval).await;
                if !self.is_current(flow_id) {
                    return None;
                }

                let checked = self
                    .client
                    .request(ApiRequest::get(check_path.as_str()).without_auth_refresh())
                    .await
                    .and_then(|resp| resp.json::<TokenCheckResponse>());

                match checked {
                    Ok(check) => match check.status {
                        CheckStatus::Complete => match check.into_bundle(&server_url) {
                            Some(bundle) => return Some(PollResult::Approved(bundle)),
                            None => warn!(flow_id, "Completed check without credentials"),
                        },
                        CheckStatus::Expired => return Some(PollResult::Expired),
                        CheckStatus::Pending | CheckStatus::Unknown => {
                            debug!(flow_id, "Login still pending")
                        }
                    },
                    Err(e) => debug!(flow_id, error = %e, "Token check failed, still polling"),
                }
            }
        };

        let outcome = match tokio::time::timeout_at(deadline, polling).await {
            Ok(Some(PollResult::Approved(bundle))) => {
                self.complete(flow_id, bundle);
                return;
            }
            Ok(Some(PollResult::Expired)) => FlowOutcome::Expired,
            Ok(None) => return,
            Err(_) => FlowOutcome::TimedOut,
        };
        self.settle(flow_id, outcome);
    }

    fn is_current(&self, flow_id: u64) -> bool {
        self.flow_slot()
            .as_ref()
            .map(|r| r.id == flow_id && r.is_active())
            .unwrap_or(false)
    }

    /// Install credentials and settle, atomically with respect to cancel
    fn complete(&self, flow_id: u64, bundle: CredentialBundle) {
        let mut flow = self.flow_slot();
        let Some(record) = flow
            .as_mut()
            .filter(|r| r.id == flow_id && r.is_active())
        else {
            return;
        };

        let user = bundle.user.clone();
        let outcome = match self.store.save(bundle) {
            Ok(()) => {
                info!(user = %user.username, "Login completed");
                FlowOutcome::Completed(user)
            }
            Err(e) => {
                error!(error = %e, "Login approved but credentials could not be stored");
                FlowOutcome::Failed(e.to_string())
            }
        };
        self.settle_record(record, outcome);
    }

    fn settle(&self, flow_id: u64, outcome: FlowOutcome) {
        let mut flow = self.flow_slot();
        if let Some(record) = flow
            .as_mut()
            .filter(|r| r.id == flow_id && r.is_active())
        {
            self.settle_record(record, outcome);
        }
    }

    fn settle_record(&self, record: &mut FlowRecord, outcome: FlowOutcome) {
        // Called from the polling task itself: drop the handle, don't abort
        record.task.take();
        let state = outcome.state();
        if state != FlowState::Completed {
            info!(flow_id = record.id, state = ?state, "Login flow ended");
        }
        record.outcome.send_replace(Some(outcome));
        self.state.send_replace(state);
    }
}
