//! Per-dependency circuit breaker state machine.
//!
//! Pure logic: the caller passes the current time into every method and is
//! responsible for actually performing (or skipping) the external call. The
//! async call wrapper lives in the `monitor` crate.
//!
//! ```text
//! closed --(N consecutive failures)--> open
//! open --(recovery_timeout elapsed, checked on next acquire)--> half_open
//! half_open --(trial succeeds)--> closed
//! half_open --(trial fails)--> open
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{span, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Consecutive failures that trip a closed breaker.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long a breaker stays open before allowing a trial call.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Returned instead of attempting a call while the breaker is open (or a
/// half-open trial is already in flight).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Circuit open for dependency '{dependency}'")]
pub struct CircuitOpenError {
    pub dependency: String,
    /// Earliest time a trial call will be admitted, when known.
    pub retry_after: Option<Timestamp>,
}

/// Admission ticket for one call. Must be handed back through
/// [`CircuitBreaker::record_success`], [`CircuitBreaker::record_failure`], or
/// [`CircuitBreaker::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Ordinary call through a closed breaker.
    Normal,
    /// The single half-open trial call.
    Trial,
}

/// A state change caused by an acquire or a recorded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl Transition {
    /// True only for `closed -> open`, the start of a new open period.
    ///
    /// A failed half-open trial re-opens the breaker but continues the same
    /// open period.
    pub fn starts_open_period(&self) -> bool {
        self.from == CircuitState::Closed && self.to == CircuitState::Open
    }
}

/// Read-only view handed to the alert engine and the status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failure_count: u32,
    pub last_failure_time: Option<Timestamp>,
    pub last_state_change_time: Timestamp,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Timestamp>,
    last_state_change_time: Timestamp,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig, now: Timestamp) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            last_state_change_time: now,
            trial_in_flight: false,
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Ask to make a call at `now`.
    ///
    /// An open breaker whose recovery timeout has elapsed moves to
    /// `half_open` here and admits the caller as the trial.
    pub fn try_acquire(&mut self, now: Timestamp) -> Result<Permit, CircuitOpenError> {
        match self.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let reopen_at = self.last_state_change_time + span(self.config.recovery_timeout);
                if now >= reopen_at {
                    self.set_state(CircuitState::HalfOpen, now);
                    self.trial_in_flight = true;
                    Ok(Permit::Trial)
                } else {
                    Err(self.open_error(Some(reopen_at)))
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Err(self.open_error(None))
                } else {
                    self.trial_in_flight = true;
                    Ok(Permit::Trial)
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self, permit: Permit, now: Timestamp) -> Option<Transition> {
        match (permit, self.state) {
            (Permit::Trial, CircuitState::HalfOpen) => {
                self.trial_in_flight = false;
                self.consecutive_failures = 0;
                self.last_failure_time = None;
                Some(self.set_state(CircuitState::Closed, now))
            }
            (Permit::Normal, CircuitState::Closed) => {
                self.consecutive_failures = 0;
                None
            }
            // A late success from a call admitted before the breaker opened.
            _ => None,
        }
    }

    /// Record a failed (or timed out) call.
    pub fn record_failure(&mut self, permit: Permit, now: Timestamp) -> Option<Transition> {
        self.last_failure_time = Some(now);
        match (permit, self.state) {
            (Permit::Trial, CircuitState::HalfOpen) => {
                self.trial_in_flight = false;
                Some(self.set_state(CircuitState::Open, now))
            }
            (Permit::Normal, CircuitState::Closed) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    Some(self.set_state(CircuitState::Open, now))
                } else {
                    None
                }
            }
            _ => {
                self.consecutive_failures += 1;
                None
            }
        }
    }

    /// Return a permit without an outcome (the call was cancelled).
    ///
    /// Neither a success nor a failure; a released trial lets the next caller
    /// become the trial.
    pub fn release(&mut self, permit: Permit) {
        if permit == Permit::Trial && self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            dependency: self.dependency.clone(),
            state: self.state,
            consecutive_failure_count: self.consecutive_failures,
            last_failure_time: self.last_failure_time,
            last_state_change_time: self.last_state_change_time,
        }
    }

    fn set_state(&mut self, to: CircuitState, now: Timestamp) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_state_change_time = now;
        Transition { from, to }
    }

    fn open_error(&self, retry_after: Option<Timestamp>) -> CircuitOpenError {
        CircuitOpenError {
            dependency: self.dependency.clone(),
            retry_after,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
