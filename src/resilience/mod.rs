//! Resilience primitives used by the API client.
//!
//! # Data Flow
//! ```text
//! Request to endpoint:
//!     → circuit_breaker.rs (fail fast if the endpoint's circuit is open)
//!     → transport call
//!     → On 5xx / no response: circuit_breaker.rs records the failure,
//!       retry.rs decides whether and how long to back off
//! ```
//!
//! Both are independent of the transport: the breaker is a per-key state
//! table and the retry policy is a pure function of the error and attempt.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitState};
pub use retry::RetryPolicy;
