//! Resilient media server client
//!
//! Every outbound call goes through [`ApiClient::request`]:
//!
//! 1. fail fast with `CircuitOpen` if the endpoint's circuit is open
//! 2. attach the current credentials (done by the transport, per attempt)
//! 3. on success, close the circuit and return
//! 4. on 5xx / no response, record the failure, ask the health monitor for a
//!    probe, back off and go back to 1 until attempts run out
//! 5. on the first 401, refresh the token once and replay; a second 401
//!    (or a failed refresh) surfaces as `Auth`
//! 6. any other 4xx is returned as is

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::ApiError;
use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::auth::TokenRefreshManager;
use crate::health::ServerHealthMonitor;
use crate::resilience::{CircuitBreaker, RetryPolicy};

/// Request client with breaker, retry, refresh and health hooks
pub struct ApiClient {
    transport: Arc<Transport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    refresher: TokenRefreshManager,
    health: ServerHealthMonitor,
}

impl ApiClient {
    pub fn new(
        transport: Arc<Transport>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        refresher: TokenRefreshManager,
        health: ServerHealthMonitor,
    ) -> Self {
        Self {
            transport,
            breaker,
            retry,
            refresher,
            health,
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn health(&self) -> &ServerHealthMonitor {
        &self.health
    }

    /// Issue a request with the full resilience algorithm. Returns only 2xx
    /// responses; every other outcome is an `ApiError`.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let key = request.endpoint_key().to_string();
        let mut attempt = 0u32;
        let mut refreshed = false;

        loop {
            if self.breaker.is_open(&key) {
                debug!(endpoint = %key, "Circuit open, failing fast");
                return Err(ApiError::CircuitOpen(key));
            }

            let result = self
                .transport
                .send(&request)
                .await
                .and_then(ApiResponse::error_for_status);

            match result {
                Ok(response) => {
                    self.breaker.record_success(&key);
                    return Ok(response);
                }
                Err(ApiError::Auth) => {
                    // The server answered, so the endpoint itself is healthy
                    self.breaker.record_success(&key);
                    if refreshed || request.skip_auth_refresh {
                        return Err(ApiError::Auth);
                    }
                    refreshed = true;
                    debug!(endpoint = %key, "Got 401, refreshing token");
                    if !self.refresher.refresh().await {
                        return Err(ApiError::Auth);
                    }
                }
                Err(error) if self.retry.should_retry(&error) => {
                    attempt += 1;
                    self.breaker.record_failure(&key);
                    self.health.probe_now();

                    if !self.retry.has_attempts_left(attempt) {
                        warn!(endpoint = %key, attempt, error = %error, "Request failed, retries exhausted");
                        return Err(error);
                    }
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        endpoint = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.status().is_some() {
                        self.breaker.record_success(&key);
                    }
                    return Err(error);
                }
            }
        }
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(ApiRequest::get(path)).await?.json()
    }

    /// POST `body` to `path` and decode the JSON response
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(ApiRequest::post(path).json(body)?)
            .await?
            .json()
    }
}
