//! Authentication
//!
//! - Handoff: opening the external identity-provider page
//! - Refresh: single-flight token renewal
//! - Orchestrator: provider-redirect and QR-pairing login flows

pub mod handoff;
pub mod orchestrator;
pub mod refresh;

pub use handoff::{Handoff, NoopHandoff, SystemBrowser};
pub use orchestrator::{AuthOrchestrator, AuthSettings};
pub use refresh::{RefreshSettings, TokenRefreshManager};
