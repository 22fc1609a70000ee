//! Per-service circuit breaker.
//!
//! Counts failures per service name. Once the count reaches the
//! threshold the circuit opens; it closes again lazily on the first
//! `is_open` check made after the timeout has elapsed. There is no
//! stored half-open state.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

/// Default: open after 5 failures.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default: stay open for 60 seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Default)]
struct CircuitState {
    failures: u32,
    opened_at: Option<Instant>,
}

/// Snapshot of one circuit for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStatus {
    pub service: String,
    pub failures: u32,
    pub open: bool,
    /// Seconds until the circuit may close (0 when closed).
    pub retry_after_secs: u64,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    circuits: Mutex<HashMap<String, CircuitState>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_limits(DEFAULT_FAILURE_THRESHOLD, DEFAULT_TIMEOUT_SECS)
    }
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self::with_limits(config.failure_threshold, config.timeout_secs)
    }

    pub fn with_limits(failure_threshold: u32, timeout_secs: u64) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            timeout: Duration::from_secs(timeout_secs),
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_open(&self, service: &str) -> bool {
        self.is_open_at(service, Instant::now())
    }

    /// Whether calls to `service` should be short-circuited at `now`.
    /// An expired open circuit is reset here.
    pub fn is_open_at(&self, service: &str, now: Instant) -> bool {
        let mut circuits = self.circuits.lock();
        let Some(state) = circuits.get_mut(service) else {
            return false;
        };
        let Some(opened_at) = state.opened_at else {
            return false;
        };

        if now.saturating_duration_since(opened_at) > self.timeout {
            state.failures = 0;
            state.opened_at = None;
            tracing::info!(service, "Circuit timeout elapsed, closing");
            return false;
        }
        true
    }

    pub fn record_failure(&self, service: &str) {
        self.record_failure_at(service, Instant::now());
    }

    pub fn record_failure_at(&self, service: &str, now: Instant) {
        let mut circuits = self.circuits.lock();
        let state = circuits.entry(service.to_string()).or_default();
        state.failures = state.failures.saturating_add(1);
        if state.failures >= self.failure_threshold {
            if state.opened_at.is_none() {
                tracing::warn!(
                    service,
                    failures = state.failures,
                    timeout_secs = self.timeout.as_secs(),
                    "Circuit opened"
                );
            }
            state.opened_at = Some(now);
        }
    }

    pub fn record_success(&self, service: &str) {
        let mut circuits = self.circuits.lock();
        if let Some(state) = circuits.get_mut(service) {
            if state.opened_at.is_some() || state.failures > 0 {
                tracing::debug!(service, "Circuit reset after success");
            }
            state.failures = 0;
            state.opened_at = None;
        }
    }

    pub fn failure_count(&self, service: &str) -> u32 {
        self.circuits
            .lock()
            .get(service)
            .map_or(0, |state| state.failures)
    }

    /// Status snapshot without triggering the lazy reset.
    pub fn status(&self, service: &str) -> CircuitStatus {
        let circuits = self.circuits.lock();
        let state = circuits.get(service).cloned().unwrap_or_default();
        let remaining = state
            .opened_at
            .map(|opened| self.timeout.saturating_sub(opened.elapsed()))
            .unwrap_or_default();
        CircuitStatus {
            service: service.to_string(),
            failures: state.failures,
            open: state.opened_at.is_some() && !remaining.is_zero(),
            retry_after_secs: remaining.as_secs(),
        }
    }
}
