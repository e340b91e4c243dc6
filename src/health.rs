//! Server health monitoring
//!
//! Failing requests ask for a probe with [`ServerHealthMonitor::probe_now`].
//! Requests are debounced: during an outage every in-flight request fails
//! and asks, but at most one probe is scheduled at a time and probes are
//! spaced by the debounce window. Once the server is seen down, a recovery
//! loop re-probes on a fixed interval until it comes back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::endpoints;
use crate::api::transport::{ApiRequest, Transport};
use crate::api::ApiError;
use crate::models::{ServerHealth, SystemStatusResponse};
use crate::resilience::RetryPolicy;

/// Message used when the status endpoint cannot be reached at all
pub const UNREACHABLE_MESSAGE: &str = "Unable to reach the media server";

/// Probe timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    /// Minimum spacing between completed probes
    pub debounce_window: Duration,
    /// Delay before a requested probe fires, letting a burst settle
    pub settle_delay: Duration,
    /// Spacing of recovery probes while the server is down
    pub recovery_interval: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            recovery_interval: Duration::from_secs(10),
        }
    }
}

/// Debounced status probing and recovery polling
#[derive(Clone)]
pub struct ServerHealthMonitor {
    inner: Arc<HealthInner>,
}

struct HealthInner {
    transport: Arc<Transport>,
    retry: RetryPolicy,
    settings: HealthSettings,
    health: watch::Sender<ServerHealth>,
    probe: Mutex<ProbeSlot>,
    recovery: Mutex<Option<JoinHandle<()>>>,
    probes_sent: AtomicU64,
}

#[derive(Default)]
struct ProbeSlot {
    pending: Option<JoinHandle<()>>,
    last_completed: Option<Instant>,
}

impl ServerHealthMonitor {
    pub fn new(transport: Arc<Transport>, retry: RetryPolicy, settings: HealthSettings) -> Self {
        let (health, _) = watch::channel(ServerHealth::healthy());
        Self {
            inner: Arc::new(HealthInner {
                transport,
                retry,
                settings,
                health,
                probe: Mutex::new(ProbeSlot::default()),
                recovery: Mutex::new(None),
                probes_sent: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> ServerHealth {
        self.inner.health.borrow().clone()
    }

    pub fn is_server_down(&self) -> bool {
        self.inner.health.borrow().is_down
    }

    pub fn status_message(&self) -> Option<String> {
        self.inner.health.borrow().message.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerHealth> {
        self.inner.health.subscribe()
    }

    /// Number of status requests sent so far
    pub fn probe_count(&self) -> u64 {
        self.inner.probes_sent.load(Ordering::Relaxed)
    }

    /// Ask for a probe. Never blocks; must be called inside a tokio runtime.
    pub fn probe_now(&self) {
        let mut slot = self.inner.probe_slot();
        if slot
            .pending
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
        {
            debug!("Health probe already scheduled");
            return;
        }

        let mut delay = self.inner.settings.settle_delay;
        if let Some(last) = slot.last_completed {
            let since = last.elapsed();
            if since < self.inner.settings.debounce_window {
                delay = delay.max(self.inner.settings.debounce_window - since);
            }
        }

        let monitor = self.clone();
        slot.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let health = monitor.inner.check().await;
            {
                let mut slot = monitor.inner.probe_slot();
                slot.last_completed = Some(Instant::now());
                slot.pending = None;
            }
            monitor.publish(health);
        }));
        debug!(delay_ms = delay.as_millis() as u64, "Health probe scheduled");
    }

    /// Probe immediately, bypassing the debounce, and publish the result
    pub async fn check_now(&self) -> ServerHealth {
        let health = self.inner.check().await;
        self.inner.probe_slot().last_completed = Some(Instant::now());
        self.publish(health.clone());
        health
    }

    /// Poll until a probe reports the server healthy. No-op if already polling.
    pub fn start_recovery_polling(&self) {
        let mut recovery = self.inner.recovery_slot();
        if recovery.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let interval = self.inner.settings.recovery_interval;
        let inner = self.inner.clone();
        info!(interval_secs = interval.as_secs(), "Starting recovery polling");
        *recovery = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let health = inner.check().await;
                let recovered = !health.is_down;
                inner.health.send_replace(health);
                if recovered {
                    info!("Media server recovered");
                    // Drop our own handle; aborting it from here would be pointless
                    inner.recovery_slot().take();
                    return;
                }
            }
        }));
    }

    pub fn stop_recovery_polling(&self) {
        if let Some(handle) = self.inner.recovery_slot().take() {
            handle.abort();
            debug!("Recovery polling stopped");
        }
    }

    pub fn is_recovery_polling(&self) -> bool {
        self.inner
            .recovery_slot()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Cancel every scheduled probe and poll
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.probe_slot().pending.take() {
            handle.abort();
        }
        self.stop_recovery_polling();
    }

    fn publish(&self, health: ServerHealth) {
        let down = health.is_down;
        let previous = self.inner.health.send_replace(health);
        if down {
            if !previous.is_down {
                warn!("Media server marked down");
            }
            self.start_recovery_polling();
        } else {
            self.stop_recovery_polling();
        }
    }
}

impl HealthInner {
    fn probe_slot(&self) -> MutexGuard<'_, ProbeSlot> {
        self.probe.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn recovery_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.recovery.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// One probe with its own retries
    async fn check(&self) -> ServerHealth {
        let request = ApiRequest::get(endpoints::SYSTEM_STATUS).without_auth_refresh();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.probes_sent.fetch_add(1, Ordering::Relaxed);
            let result = self
                .transport
                .send(&request)
                .await
                .and_then(|resp| resp.error_for_status());

            let error = match result {
                Ok(resp) => {
                    return match resp.json::<SystemStatusResponse>() {
                        Ok(status) => status.to_health(),
                        Err(e) => {
                            debug!(error = %e, "Unreadable status body, server is reachable");
                            ServerHealth::healthy()
                        }
                    };
                }
                // Answering at all with a 4xx means the server is up
                Err(e @ (ApiError::ClientError { .. } | ApiError::Auth)) => {
                    debug!(error = %e, "Status endpoint refused the probe, server is reachable");
                    return ServerHealth::healthy();
                }
                Err(e) => e,
            };

            if !self.retry.should_retry(&error) || !self.retry.has_attempts_left(attempt) {
                warn!(attempt, error = %error, "Health probe failed");
                return ServerHealth::down(UNREACHABLE_MESSAGE);
            }
            tokio::time::sleep(self.retry.delay_for(attempt)).await;
        }
    }
}
