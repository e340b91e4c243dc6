//! Per-endpoint circuit breaker.
//!
//! # States
//! - Closed: normal operation, requests pass through (no entry in the table)
//! - Open: endpoint assumed down, requests fail fast
//! - Half-Open: one trial request is let through to test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count reaches threshold
//! Open → Half-Open: first check after cooldown has elapsed since the last failure
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails
//! Closed (with failures) / Half-Open → dropped: reset window elapsed since the last failure
//! ```
//!
//! Every read-then-write on an entry happens under one mutex, so concurrent
//! failures never lose an increment.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub threshold: u32,
    /// Time an open circuit waits after its last failure before a trial
    pub cooldown: Duration,
    /// Quiet time after which a closed circuit forgets its failures
    pub reset_window: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(60),
            reset_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Observable state of one endpoint's circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
struct CircuitEntry {
    failure_count: u32,
    last_failure: Instant,
    state: CircuitState,
    /// When the current half-open trial was let through
    trial_started: Option<Instant>,
}

/// Failure tracking keyed by endpoint
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    entries: Mutex<HashMap<String, CircuitEntry>>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    /// Whether calls to `key` must fail fast right now
    pub fn is_open(&self, key: &str) -> bool {
        self.is_open_at(key, Instant::now())
    }

    /// Forget all failures recorded for `key`
    pub fn record_success(&self, key: &str) {
        if let Some(entry) = self.lock().remove(key) {
            if entry.state != CircuitState::Closed {
                info!(endpoint = %key, "Circuit closed");
            }
        }
    }

    pub fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now())
    }

    /// Current state of `key` without triggering transitions
    pub fn state(&self, key: &str) -> CircuitState {
        self.lock()
            .get(key)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn failure_count(&self, key: &str) -> u32 {
        self.lock().get(key).map(|e| e.failure_count).unwrap_or(0)
    }

    /// Close every circuit
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub(crate) fn is_open_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let since_failure = now.saturating_duration_since(entry.last_failure);
        let state = entry.state;

        match state {
            CircuitState::Open => {
                if since_failure >= self.settings.cooldown {
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_started = Some(now);
                    info!(endpoint = %key, "Circuit half-open, allowing one trial request");
                    false
                } else {
                    true
                }
            }
            CircuitState::HalfOpen if since_failure > self.settings.reset_window => {
                entries.remove(key);
                info!(endpoint = %key, "Half-open circuit idle past reset window, closed");
                false
            }
            CircuitState::HalfOpen => {
                // One trial at a time; a trial that never reported back is
                // replaced after another cooldown
                let stale = entry
                    .trial_started
                    .map(|t| now.saturating_duration_since(t) >= self.settings.cooldown)
                    .unwrap_or(true);
                if stale {
                    entry.trial_started = Some(now);
                    false
                } else {
                    true
                }
            }
            CircuitState::Closed => {
                if since_failure > self.settings.reset_window {
                    entries.remove(key);
                }
                false
            }
        }
    }

    pub(crate) fn record_failure_at(&self, key: &str, now: Instant) {
        let mut entries = self.lock();
        let entry = entries.entry(key.to_string()).or_insert(CircuitEntry {
            failure_count: 0,
            last_failure: now,
            state: CircuitState::Closed,
            trial_started: None,
        });

        if entry.state == CircuitState::Closed
            && now.saturating_duration_since(entry.last_failure) > self.settings.reset_window
        {
            entry.failure_count = 0;
        }

        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure = now;

        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.trial_started = None;
                warn!(endpoint = %key, "Trial request failed, circuit re-opened");
            }
            CircuitState::Closed if entry.failure_count >= self.settings.threshold => {
                entry.state = CircuitState::Open;
                warn!(
                    endpoint = %key,
                    failures = entry.failure_count,
                    cooldown_secs = self.settings.cooldown.as_secs(),
                    "Circuit opened"
                );
            }
            _ => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitEntry>> {
        // The table holds no invariants a panic could break mid-update
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
