//! Circuit breaker guarding calls to a single remote dependency.
//!
//! State machine and defaults follow `spec.md` §4.2 one-to-one; the three-state
//! shape and per-state counters are a direct port of the original project's
//! `pkg/circuitbreaker/circuit_breaker.go`, with the mutex critical sections kept
//! `O(1)` as required by `spec.md` §5.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cdn_edge_error::{make_err, Code, Error};
use cdn_edge_util::{HealthStatus, HealthStatusIndicator};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub max_concurrent: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(10),
            max_concurrent: 100,
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    in_flight: u32,
    last_transition: Instant,
}

/// A circuit breaker instance wrapping one logical remote dependency (a specific
/// store, for instance). Instantiate one per dependency, not one per call site.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// RAII guard released when a call guarded by the breaker finishes, decrementing
/// `in_flight` on every exit path (success, failure, or early return).
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    resolved: bool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(CircuitBreaker {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                in_flight: 0,
                last_transition: Instant::now(),
            }),
        })
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Admits a call, or rejects it with `circuit-open`/`too-many-requests`.
    pub fn try_admit(&self) -> Result<Admission<'_>, Error> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Open => {
                if inner.last_transition.elapsed() >= self.config.timeout {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                } else {
                    return Err(make_err!(
                        Code::Unavailable,
                        "circuit breaker '{}' is open",
                        self.name
                    ));
                }
            }
            BreakerState::HalfOpen | BreakerState::Closed => {}
        }
        if inner.in_flight >= self.config.max_concurrent {
            return Err(make_err!(
                Code::ResourceExhausted,
                "circuit breaker '{}': too many concurrent requests",
                self.name
            ));
        }
        inner.in_flight += 1;
        Ok(Admission {
            breaker: self,
            resolved: false,
        })
    }

    fn transition(&self, inner: &mut Inner, new_state: BreakerState) {
        inner.state = new_state;
        inner.last_transition = Instant::now();
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        tracing::info!(breaker = %self.name, state = ?new_state, "circuit breaker state changed");
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => self.transition(&mut inner, BreakerState::Open),
            BreakerState::Open => {}
        }
    }

    /// Runs `call` under the breaker's admission control, recording the outcome.
    pub async fn call<T, F, Fut>(&self, call: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let mut admission = self.try_admit()?;
        let result = call().await;
        match &result {
            Ok(_) => admission.mark_success(),
            Err(_) => admission.mark_failure(),
        }
        result
    }
}

impl Admission<'_> {
    pub fn mark_success(&mut self) {
        if !self.resolved {
            self.breaker.record_success();
            self.resolved = true;
        }
    }

    pub fn mark_failure(&mut self) {
        if !self.resolved {
            self.breaker.record_failure();
            self.resolved = true;
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }
}

#[async_trait::async_trait]
impl HealthStatusIndicator for CircuitBreaker {
    fn component_name(&self) -> &str {
        &self.name
    }

    async fn check_health(&self) -> HealthStatus {
        match self.state() {
            BreakerState::Open => HealthStatus::unhealthy(&self.name, "circuit open"),
            _ => HealthStatus::ok(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(20),
            max_concurrent: 2,
        }
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("dep", test_config());
        for _ in 0..3 {
            let result: Result<(), Error> = breaker
                .call(|| async { Err(make_err!(Code::Unavailable, "boom")) })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        let result: Result<(), Error> = breaker.call(|| async { Ok(()) }).await;
        assert_eq!(result.unwrap_err().code, Code::Unavailable);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("dep", test_config());
        for _ in 0..3 {
            let _: Result<(), Error> = breaker
                .call(|| async { Err(make_err!(Code::Unavailable, "boom")) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;

        for _ in 0..2 {
            let result: Result<(), Error> = breaker.call(|| async { Ok(()) }).await;
            assert!(result.is_ok());
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("dep", test_config());
        for _ in 0..3 {
            let _: Result<(), Error> = breaker
                .call(|| async { Err(make_err!(Code::Unavailable, "boom")) })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        let result: Result<(), Error> = breaker
            .call(|| async { Err(make_err!(Code::Unavailable, "still failing")) })
            .await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn enforces_max_concurrent_admissions() {
        let breaker = CircuitBreaker::new("dep", test_config());
        let admission1 = breaker.try_admit().unwrap();
        let admission2 = breaker.try_admit().unwrap();
        let admission3 = breaker.try_admit();
        assert!(admission3.is_err());
        drop(admission1);
        drop(admission2);
        assert!(breaker.try_admit().is_ok());
    }
}
