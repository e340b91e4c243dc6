//! Integration tests for MediaGate
//!
//! Tests are organized by component:
//! - client_test: Resilient client (credentials, refresh-and-replay, retries, circuit breaker)
//! - refresh_test: Single-flight token refresh
//! - health_test: Server health probes, debouncing and recovery
//! - orchestrator_test: Provider and QR login flows
//! - session_test: Credential persistence across restarts
//! - cli_test: CLI parsing, JSON envelopes and exit codes
//! - e2e_test: End-to-end session lifecycle (Pair -> Request -> Refresh -> Outage -> Sign out)

// Note: Each test file is a separate integration test crate
// Tests are run individually by cargo, not via mod.rs
