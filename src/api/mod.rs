//! Media server API access
//!
//! - Transport: one physical request with credentials attached
//! - Client: breaker, retry, token refresh and health hooks around it
//! - Endpoints: server paths
//! - Error: the error taxonomy every caller sees

pub mod client;
pub mod endpoints;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, Transport};
