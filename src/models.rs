//! Data structures and types for MediaGate
//!
//! Contains all shared models used across the crate organized by domain:
//! - **Session**: the credential bundle and the signed-in user
//! - **Login**: provider-redirect and QR-pairing sessions, flow states
//! - **Health**: the process-wide server health value
//! - **Wire**: request/response bodies of the media server's auth endpoints

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Session Models
// =============================================================================

/// Profile of the signed-in user as reported by the media server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} ({})", name, self.username),
            None => write!(f, "{}", self.username),
        }
    }
}

/// Server address, user, access token and session id as one atomic unit.
///
/// A signed-out client has no bundle at all (`Option<CredentialBundle>` is
/// `None`); there is no way to represent a bundle with a missing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundle {
    pub server_url: String,
    pub user: User,
    pub access_token: String,
    pub session_id: String,
}

impl CredentialBundle {
    /// Copy of this bundle carrying a renewed token (and session id, if the
    /// server rotated it)
    pub fn with_token(&self, access_token: String, session_id: Option<String>) -> Self {
        Self {
            server_url: self.server_url.clone(),
            user: self.user.clone(),
            access_token,
            session_id: session_id.unwrap_or_else(|| self.session_id.clone()),
        }
    }

    /// Same server, user and session; the token may differ
    pub fn same_session(&self, other: &CredentialBundle) -> bool {
        self.session_id == other.session_id
            && self.user.id == other.user.id
            && self.server_url.trim_end_matches('/') == other.server_url.trim_end_matches('/')
    }
}

// =============================================================================
// Login Models
// =============================================================================

/// Handle for an in-progress provider-redirect login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSession {
    pub session_id: String,
    /// Unix seconds, as announced by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Where the external handoff should send the user
    pub auth_url: String,
}

/// Handle for an in-progress QR-pairing login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingSession {
    pub qr_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// URL to encode into the QR code shown on screen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_url: Option<String>,
}

/// Which login flow a session belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "provider")]
pub enum FlowKind {
    /// Browser handoff to an external identity provider
    Provider(String),
    /// Pairing by scanning a QR code on another device
    QrCode,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowKind::Provider(id) => write!(f, "provider:{}", id),
            FlowKind::QrCode => write!(f, "qr"),
        }
    }
}

/// State of the orchestrator's current login flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Idle,
    Registering,
    AwaitingCompletion,
    Completed,
    Expired,
    TimedOut,
    Cancelled,
    /// Server approved the login but the credentials could not be kept
    Failed,
}

impl FlowState {
    /// True once the flow can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Completed
                | FlowState::Expired
                | FlowState::TimedOut
                | FlowState::Cancelled
                | FlowState::Failed
        )
    }
}

/// How a login flow ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Completed(User),
    Expired,
    TimedOut,
    Cancelled,
    Failed(String),
}

impl FlowOutcome {
    /// The flow state this outcome settles into
    pub fn state(&self) -> FlowState {
        match self {
            FlowOutcome::Completed(_) => FlowState::Completed,
            FlowOutcome::Expired => FlowState::Expired,
            FlowOutcome::TimedOut => FlowState::TimedOut,
            FlowOutcome::Cancelled => FlowState::Cancelled,
            FlowOutcome::Failed(_) => FlowState::Failed,
        }
    }
}

// =============================================================================
// Health Models
// =============================================================================

/// Current reachability of the media server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub is_down: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServerHealth {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            is_down: true,
            message: Some(message.into()),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            is_down: false,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for ServerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.is_down { "DOWN" } else { "UP" };
        match &self.message {
            Some(msg) => write!(f, "{} - {}", label, msg),
            None => write!(f, "{}", label),
        }
    }
}

// =============================================================================
// Wire Models
// =============================================================================

/// Body of `register-session`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterSessionRequest<'a> {
    pub client_id: &'a str,
    pub provider_id: &'a str,
}

/// Body of `register-qr-session`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterQrSessionRequest<'a> {
    pub client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<&'a str>,
}

/// Status reported by `check-token` / `check-qr-token`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pending,
    Complete,
    Expired,
    #[serde(other)]
    Unknown,
}

/// Response of `check-token` / `check-qr-token`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCheckResponse {
    pub status: CheckStatus,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

impl TokenCheckResponse {
    /// Build the credential bundle a `complete` response carries, if it is whole
    pub fn into_bundle(self, server_url: &str) -> Option<CredentialBundle> {
        Some(CredentialBundle {
            server_url: server_url.to_string(),
            user: self.user?,
            access_token: self.access_token.filter(|t| !t.is_empty())?,
            session_id: self.session_id.filter(|s| !s.is_empty())?,
        })
    }
}

/// Response of `refresh-token`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Response of `user-status`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserStatusResponse {
    pub user: User,
}

/// Overall state reported by `system-status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    Ok,
    Degraded,
    Down,
    #[serde(other)]
    Unknown,
}

/// One component line of `system-status`
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub healthy: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `system-status`
#[derive(Debug, Clone, Deserialize)]
pub struct SystemStatusResponse {
    pub status: SystemState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentStatus>,
}

impl SystemStatusResponse {
    /// Interpret the report as a health value
    pub fn to_health(&self) -> ServerHealth {
        let issues: Vec<String> = self
            .components
            .iter()
            .filter(|c| !c.healthy)
            .map(|c| match &c.message {
                Some(msg) => format!("{}: {}", c.name, msg),
                None => format!("{} unavailable", c.name),
            })
            .collect();

        match self.status {
            SystemState::Down => ServerHealth::down(
                self.message
                    .clone()
                    .unwrap_or_else(|| "The media server reported an outage".to_string()),
            ),
            _ if !issues.is_empty() => {
                ServerHealth::degraded(self.message.clone().unwrap_or_else(|| issues.join("; ")))
            }
            SystemState::Degraded => ServerHealth::degraded(
                self.message
                    .clone()
                    .unwrap_or_else(|| "Some server features are unavailable".to_string()),
            ),
            SystemState::Ok | SystemState::Unknown => ServerHealth::healthy(),
        }
    }
}
