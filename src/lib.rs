//! MediaGate - resilient session and connectivity layer for a media server
//!
//! Signs a client in to a self-hosted media server (provider redirect or
//! QR-code pairing), keeps the credentials alive across token expiry, and
//! shields every call with retries, per-endpoint circuit breaking and
//! server health tracking.
//!
//! # Modules
//!
//! - `models` - Credentials, flow states, health and wire types
//! - `session` - Durable storage and the credential store
//! - `resilience` - Circuit breaker and retry policy
//! - `api` - Transport, errors and the resilient client
//! - `auth` - Token refresh, login handoff and login flows
//! - `health` - Debounced server health monitoring
//! - `app` - Component wiring and the UI-facing facade
//! - `config` - Config file and typed settings

pub mod models;
pub mod config;
pub mod session;
pub mod resilience;
pub mod api;
pub mod auth;
pub mod health;
pub mod app;
pub mod cli;
pub mod commands;

// Re-export commonly used types
pub use models::{
    CredentialBundle, User, LoginSession, PairingSession,
    FlowKind, FlowState, FlowOutcome, ServerHealth,
};

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse};
pub use app::App;
pub use config::{Config, Settings};
pub use health::ServerHealthMonitor;
pub use session::{FileStorage, MemoryStorage, SecureStorage, SessionStore};
