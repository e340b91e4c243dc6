//! One physical request to the media server
//!
//! Resolves the server URL, attaches the credentials the session store
//! holds at this instant and performs a single HTTP exchange. Credentials
//! are only sent to the server that issued them. No retries,
//! no breaker: the resilience client, the refresh manager and the health
//! monitor layer their own policies on top.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::error::ApiError;
use crate::models::CredentialBundle;
use crate::session::SessionStore;

/// Header carrying the session id
pub const SESSION_HEADER: &str = "X-Session-Id";
/// Query parameter carrying the session id, for servers that only read query strings
pub const SESSION_QUERY_PARAM: &str = "sessionId";

/// A logical request, replayable across attempts
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Do not attempt a token refresh when this request gets a 401
    pub skip_auth_refresh: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            skip_auth_refresh: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Unserializable body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn without_auth_refresh(mut self) -> Self {
        self.skip_auth_refresh = true;
        self
    }

    /// Circuit-breaker key: the path without any query string
    pub fn endpoint_key(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }
}

/// Status and body of a completed exchange
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx status into its error class
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("JSON parse error: {}", e)))
    }
}

/// HTTP transport bound to the session store
pub struct Transport {
    http: reqwest::Client,
    server_url: Option<String>,
    store: Arc<SessionStore>,
}

impl Transport {
    pub fn new(server_url: Option<String>, store: Arc<SessionStore>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            server_url: server_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            store,
        }
    }

    /// Configured server, else the one the stored credentials belong to
    pub fn server_url(&self) -> Option<String> {
        self.server_url.clone().or_else(|| {
            self.store
                .current()
                .map(|b| b.server_url.trim_end_matches('/').to_string())
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The current bundle, if it was issued by the server requests go to
    pub fn credentials(&self) -> Option<CredentialBundle> {
        let bundle = self.store.current()?;
        let base = self.server_url()?;
        if same_server(&bundle.server_url, &base) {
            Some(bundle)
        } else {
            debug!(
                server = %base,
                issued_by = %bundle.server_url,
                "Stored credentials belong to another server, not attaching them"
            );
            None
        }
    }

    /// Perform exactly one exchange. Any HTTP status is `Ok`; only a missing
    /// response is an error.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        // Read credentials now, not when the logical request started
        let credentials = self.credentials();
        self.send_as(request, credentials.as_ref()).await
    }

    /// Perform one exchange presenting `credentials`, whatever the store
    /// holds by now. `None` sends the request unauthenticated.
    pub async fn send_as(
        &self,
        request: &ApiRequest,
        credentials: Option<&CredentialBundle>,
    ) -> Result<ApiResponse, ApiError> {
        let base = self.server_url().ok_or(ApiError::NoServer)?;
        let url = format!("{}{}", base, request.path);

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header("Accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(bundle) = credentials.filter(|b| same_server(&b.server_url, &base)) {
            builder = builder
                .header(SESSION_HEADER, &bundle.session_id)
                .query(&[(SESSION_QUERY_PARAM, &bundle.session_id)])
                .bearer_auth(&bundle.access_token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, path = %request.path, "Sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        debug!(path = %request.path, status, "Response received");

        Ok(ApiResponse { status, body })
    }
}

fn same_server(a: &str, b: &str) -> bool {
    a.trim_end_matches('/')
        .eq_ignore_ascii_case(b.trim_end_matches('/'))
}
