//! Circuit breaker over logical call outcomes.
//!
//! Closed counts consecutive failures and opens at the threshold. Open
//! rejects every call until the cool-down elapses, then moves to half-open,
//! which lets exactly one probe through. The probe's outcome either closes
//! the circuit or reopens it with a longer cool-down.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::HealthConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Point-in-time view of the breaker, as handed to callers and subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    /// Time left until the next probe is allowed, while open.
    pub retry_after: Option<Duration>,
    /// Success rate over the configured window, from the metrics aggregator.
    pub recent_success_rate: Option<f64>,
}

/// Admission decision for a new logical call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The call is the single half-open probe; its outcome decides the circuit.
    Probe,
    Rejected { retry_after: Duration },
}

#[derive(Debug)]
pub struct HealthMonitor {
    failure_threshold: u32,
    base_cooldown: Duration,
    cooldown_multiplier: f64,
    max_cooldown: Duration,

    status: HealthStatus,
    consecutive_failures: u32,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        let base_cooldown = Duration::from_millis(config.cooldown_ms);
        Self {
            failure_threshold: config.failure_threshold.max(1),
            base_cooldown,
            cooldown_multiplier: config.cooldown_multiplier.max(1.0),
            max_cooldown: Duration::from_millis(config.max_cooldown_ms).max(base_cooldown),
            status: HealthStatus::Closed,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
            opened_at: None,
            cooldown: base_cooldown,
            probe_in_flight: false,
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Moves an open circuit to half-open once its cool-down has elapsed.
    /// Returns the new status when a transition happened.
    pub fn tick(&mut self, now: Instant) -> Option<HealthStatus> {
        match self.next_transition_at() {
            Some(at) if now >= at => {
                self.status = HealthStatus::HalfOpen;
                self.probe_in_flight = false;
                log::info!("bridge: circuit half-open, next call probes the backend");
                Some(HealthStatus::HalfOpen)
            }
            _ => None,
        }
    }

    /// When the open circuit becomes eligible for a probe.
    pub fn next_transition_at(&self) -> Option<Instant> {
        match (self.status, self.opened_at) {
            (HealthStatus::Open, Some(opened_at)) => Some(opened_at + self.cooldown),
            _ => None,
        }
    }

    /// Decides whether a new logical call may reach the transport. A due
    /// half-open transition is applied first; use [`tick`](Self::tick)
    /// beforehand to observe it.
    pub fn admit(&mut self, now: Instant) -> Admission {
        self.tick(now);
        match self.status {
            HealthStatus::Closed => Admission::Allowed,
            HealthStatus::HalfOpen if !self.probe_in_flight => {
                self.probe_in_flight = true;
                Admission::Probe
            }
            HealthStatus::HalfOpen => Admission::Rejected { retry_after: self.cooldown },
            HealthStatus::Open => {
                let retry_after = self
                    .next_transition_at()
                    .map(|at| at.saturating_duration_since(now))
                    .unwrap_or(self.cooldown);
                Admission::Rejected { retry_after }
            }
        }
    }

    pub fn record_success(&mut self, now: Instant) -> Option<HealthStatus> {
        self.last_success = Some(now);
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        if self.status == HealthStatus::Closed {
            return None;
        }
        log::info!("bridge: circuit closed (was {})", self.status);
        self.status = HealthStatus::Closed;
        self.opened_at = None;
        self.cooldown = self.base_cooldown;
        Some(HealthStatus::Closed)
    }

    /// Records one failed logical call. `probe` marks the half-open probe.
    pub fn record_failure(&mut self, now: Instant, probe: bool) -> Option<HealthStatus> {
        self.last_failure = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.status {
            HealthStatus::Closed if self.consecutive_failures >= self.failure_threshold => {
                self.open(now);
                Some(HealthStatus::Open)
            }
            HealthStatus::HalfOpen if probe => {
                self.probe_in_flight = false;
                self.cooldown = self.lengthened_cooldown();
                self.open(now);
                Some(HealthStatus::Open)
            }
            _ => None,
        }
    }

    /// Frees the probe slot without judging the backend, e.g. when the probe
    /// was cancelled.
    pub fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }

    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            last_success: self.last_success,
            last_failure: self.last_failure,
            retry_after: self.next_transition_at().map(|at| at.saturating_duration_since(now)),
            recent_success_rate: None,
        }
    }

    fn open(&mut self, now: Instant) {
        log::warn!(
            "bridge: circuit open after {} consecutive failures, cooling down for {:?}",
            self.consecutive_failures,
            self.cooldown
        );
        self.status = HealthStatus::Open;
        self.opened_at = Some(now);
    }

    fn lengthened_cooldown(&self) -> Duration {
        self.cooldown.mul_f64(self.cooldown_multiplier).min(self.max_cooldown)
    }
}
