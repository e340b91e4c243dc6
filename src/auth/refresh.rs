//! Token refresh
//!
//! Several requests can hit a 401 at the same moment. All of them funnel
//! into one refresh round trip: the first caller starts it, later callers
//! await the same shared future and see the same outcome.
//!
//! A refresh renews the session that was current when it started. If that
//! session is gone by the time the server answers (sign-out, or a new login
//! saved another bundle), the answer is dropped and the newer state stands.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api::endpoints;
use crate::api::transport::{ApiRequest, Transport};
use crate::models::{CredentialBundle, RefreshResponse};

/// Refresh retry limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

type RefreshFlight = Shared<BoxFuture<'static, bool>>;

/// Single-flight, bounded-attempt token renewal
#[derive(Clone)]
pub struct TokenRefreshManager {
    inner: Arc<RefreshInner>,
}

struct RefreshInner {
    transport: Arc<Transport>,
    settings: RefreshSettings,
    in_flight: Mutex<Option<RefreshFlight>>,
}

impl TokenRefreshManager {
    pub fn new(transport: Arc<Transport>, settings: RefreshSettings) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                transport,
                settings,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Renew the access token.
    ///
    /// Returns `true` once a new token is installed. Returns `false` when
    /// renewal is impossible: nothing to renew for this server, the session
    /// was replaced meanwhile, or the server refused and the bundle has been
    /// cleared.
    pub async fn refresh(&self) -> bool {
        let flight = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let flight = async move {
                        let outcome = inner.run().await;
                        inner.slot().take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Whether a refresh round trip is currently running
    pub fn is_refreshing(&self) -> bool {
        self.inner.slot().is_some()
    }
}

impl RefreshInner {
    fn slot(&self) -> MutexGuard<'_, Option<RefreshFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(&self) -> bool {
        let Some(started) = self.transport.credentials() else {
            debug!("No credentials to refresh");
            return false;
        };

        let max_attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let request = ApiRequest::post(endpoints::REFRESH_TOKEN).without_auth_refresh();
            match self.transport.send_as(&request, Some(&started)).await {
                Ok(resp) if resp.is_success() => match resp.json::<RefreshResponse>() {
                    Ok(renewed) if !renewed.access_token.is_empty() => {
                        return self.install(&started, renewed);
                    }
                    Ok(_) => warn!(attempt, "Refresh response carried an empty token"),
                    Err(e) => warn!(attempt, error = %e, "Refresh response unreadable"),
                },
                Ok(resp) if resp.status == 401 || resp.status == 403 => {
                    warn!(status = resp.status, "Refresh rejected by server");
                    return self.sign_out(&started);
                }
                Ok(resp) => warn!(attempt, status = resp.status, "Token refresh failed"),
                Err(e) => warn!(attempt, error = %e, "Token refresh failed"),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }

        warn!(max_attempts, "Token refresh attempts exhausted");
        self.sign_out(&started)
    }

    fn install(&self, started: &CredentialBundle, renewed: RefreshResponse) -> bool {
        let renew = |current: &CredentialBundle| {
            let mut bundle = current.with_token(renewed.access_token, renewed.session_id);
            if let Some(user) = renewed.user {
                bundle.user = user;
            }
            bundle
        };

        match self.transport.store().update_if_current(started, renew) {
            Ok(true) => {
                info!("Access token refreshed");
                true
            }
            Ok(false) => {
                info!("Session changed during refresh, discarding renewed token");
                false
            }
            Err(e) => {
                error!(error = %e, "Could not persist refreshed credentials");
                self.sign_out(started)
            }
        }
    }

    fn sign_out(&self, started: &CredentialBundle) -> bool {
        match self.transport.store().clear_if_current(started) {
            Ok(true) => {}
            Ok(false) => debug!("Session changed during refresh, leaving it in place"),
            Err(e) => warn!(error = %e, "Failed to clear stored credentials"),
        }
        false
    }
}
