//! Per-dependency circuit breakers around external calls.
//!
//! [`BreakerRegistry::call`] is the only path to an external dependency. It
//! asks the dependency's [`CircuitBreaker`] for a permit, runs the call
//! under a timeout and a cancellation token, and records the outcome. State
//! transitions that matter to operators are published on the event bus.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use adwatch_core::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitSnapshot, CircuitState, Permit,
    Transition,
};
use adwatch_core::types::span;
use adwatch_events::{EventBus, MonitorEvent};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Why a call through a breaker did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// Rejected without reaching the dependency.
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The call exceeded its deadline. Counts as a failure.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// Cancelled by the caller. Neither success nor failure.
    #[error("Call cancelled")]
    Cancelled,

    /// The dependency returned an error. Counts as a failure.
    #[error("{0}")]
    Inner(E),
}

/// Registry of breakers keyed by dependency name.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    bus: Arc<EventBus>,
}

impl BreakerRegistry {
    /// Create a registry with breakers pre-registered for `dependencies`.
    pub fn new(config: CircuitBreakerConfig, bus: Arc<EventBus>, dependencies: &[&str]) -> Self {
        let now = Utc::now();
        let breakers = dependencies
            .iter()
            .map(|d| (d.to_string(), CircuitBreaker::new(*d, config.clone(), now)))
            .collect();
        Self {
            config,
            breakers: Mutex::new(breakers),
            bus,
        }
    }

    // Breaker bookkeeping never panics while holding the lock, so a poisoned
    // mutex still holds consistent state.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_breaker<R>(&self, dependency: &str, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut map = self.lock();
        let breaker = map
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitBreaker::new(dependency, self.config.clone(), Utc::now()));
        f(breaker)
    }

    /// Run `f` through the breaker for `dependency`.
    ///
    /// Rejects immediately with [`CallError::Open`] while the breaker is
    /// open (or a half-open trial is already in flight). Timeouts and inner
    /// errors count as failures; cancellation releases the permit without
    /// recording an outcome.
    pub async fn call<T, E, F, Fut>(
        &self,
        dependency: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.with_breaker(dependency, |b| b.try_acquire(Utc::now())) {
            Ok(permit) => permit,
            Err(open) => {
                tracing::debug!(dependency, retry_after = ?open.retry_after, "Circuit open, call rejected");
                return Err(CallError::Open(open));
            }
        };
        if permit == Permit::Trial {
            tracing::info!(dependency, "Circuit half-open, running trial call");
        }
        let mut guard = PermitGuard {
            registry: self,
            dependency,
            permit: Some(permit),
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, f()) => Some(result),
        };

        let permit = guard.take();
        match outcome {
            None => {
                self.with_breaker(dependency, |b| b.release(permit));
                Err(CallError::Cancelled)
            }
            Some(Ok(Ok(value))) => {
                self.record(dependency, |b, now| b.record_success(permit, now));
                Ok(value)
            }
            Some(Ok(Err(e))) => {
                self.record(dependency, |b, now| b.record_failure(permit, now));
                Err(CallError::Inner(e))
            }
            Some(Err(_elapsed)) => {
                tracing::warn!(dependency, timeout_ms = timeout.as_millis() as u64, "Call timed out");
                self.record(dependency, |b, now| b.record_failure(permit, now));
                Err(CallError::Timeout(timeout))
            }
        }
    }

    fn record(
        &self,
        dependency: &str,
        f: impl FnOnce(&mut CircuitBreaker, chrono::DateTime<Utc>) -> Option<Transition>,
    ) {
        let (transition, snapshot) = self.with_breaker(dependency, |b| {
            let transition = f(b, Utc::now());
            (transition, b.snapshot())
        });
        let Some(transition) = transition else {
            return;
        };

        tracing::info!(
            dependency,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            consecutive_failures = snapshot.consecutive_failure_count,
            "Circuit state changed"
        );

        if transition.starts_open_period() {
            self.bus.publish(MonitorEvent::CircuitOpened {
                dependency: dependency.to_string(),
                consecutive_failures: snapshot.consecutive_failure_count,
                retry_after: Some(
                    snapshot.last_state_change_time + span(self.config.recovery_timeout),
                ),
            });
        } else if transition.from == CircuitState::HalfOpen && transition.to == CircuitState::Closed
        {
            self.bus.publish(MonitorEvent::CircuitClosed {
                dependency: dependency.to_string(),
            });
        }
    }

    pub fn state(&self, dependency: &str) -> Option<CircuitState> {
        self.lock().get(dependency).map(|b| b.state())
    }

    /// Snapshots of every breaker, sorted by dependency.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self.lock().values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }
}

/// Releases an unconsumed permit if the call future is dropped mid-flight.
struct PermitGuard<'a> {
    registry: &'a BreakerRegistry,
    dependency: &'a str,
    permit: Option<Permit>,
}

impl PermitGuard<'_> {
    fn take(&mut self) -> Permit {
        self.permit.take().unwrap_or(Permit::Normal)
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.registry.with_breaker(self.dependency, |b| b.release(permit));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    fn registry(threshold: u32, recovery: Duration) -> (BreakerRegistry, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: recovery,
        };
        (BreakerRegistry::new(config, bus.clone(), &["generation"]), bus)
    }

    async fn fail(reg: &BreakerRegistry) -> Result<(), CallError<&'static str>> {
        reg.call("generation", Duration::from_secs(1), &CancellationToken::new(), || async {
            Err::<(), _>("boom")
        })
        .await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects_without_calling() {
        let (reg, bus) = registry(5, Duration::from_secs(300));
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            assert_matches!(fail(&reg).await, Err(CallError::Inner("boom")));
        }
        assert_eq!(reg.state("generation"), Some(CircuitState::Open));

        let calls = AtomicUsize::new(0);
        let result = reg
            .call("generation", Duration::from_secs(1), &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert_matches!(result, Err(CallError::Open(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let event = rx.recv().await.unwrap();
        assert_matches!(event.event, MonitorEvent::CircuitOpened { consecutive_failures: 5, .. });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn trial_success_closes_and_publishes() {
        let (reg, bus) = registry(1, Duration::from_millis(50));
        let mut rx = bus.subscribe();
        let _ = fail(&reg).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let ok = reg
            .call("generation", Duration::from_secs(1), &CancellationToken::new(), || async {
                Ok::<_, &str>(7)
            })
            .await;
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(reg.state("generation"), Some(CircuitState::Closed));

        assert_matches!(rx.recv().await.unwrap().event, MonitorEvent::CircuitOpened { .. });
        assert_matches!(rx.recv().await.unwrap().event, MonitorEvent::CircuitClosed { .. });
    }

    #[tokio::test]
    async fn failed_trial_reopens_without_new_event() {
        let (reg, bus) = registry(1, Duration::from_millis(50));
        let mut rx = bus.subscribe();
        let _ = fail(&reg).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_matches!(fail(&reg).await, Err(CallError::Inner(_)));
        assert_eq!(reg.state("generation"), Some(CircuitState::Open));

        assert_matches!(rx.recv().await.unwrap().event, MonitorEvent::CircuitOpened { .. });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let (reg, _bus) = registry(1, Duration::from_secs(300));
        let result = reg
            .call("generation", Duration::from_millis(10), &CancellationToken::new(), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, &str>(())
            })
            .await;
        assert_matches!(result, Err(CallError::Timeout(_)));
        assert_eq!(reg.state("generation"), Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn cancelled_trial_releases_slot() {
        let (reg, _bus) = registry(1, Duration::from_millis(50));
        let _ = fail(&reg).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = reg
            .call("generation", Duration::from_secs(1), &cancel, || async {
                Ok::<_, &str>(())
            })
            .await;
        assert_matches!(result, Err(CallError::Cancelled));
        assert_eq!(reg.state("generation"), Some(CircuitState::HalfOpen));

        // The slot is free again for the next trial.
        let ok = reg
            .call("generation", Duration::from_secs(1), &CancellationToken::new(), || async {
                Ok::<_, &str>(())
            })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn unknown_dependency_gets_its_own_breaker() {
        let (reg, _bus) = registry(5, Duration::from_secs(300));
        let _ = reg
            .call("notification", Duration::from_secs(1), &CancellationToken::new(), || async {
                Ok::<_, &str>(())
            })
            .await;
        let deps: Vec<_> = reg.snapshots().into_iter().map(|s| s.dependency).collect();
        assert_eq!(deps, vec!["generation", "notification"]);
    }
}
