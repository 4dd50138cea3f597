// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Three-state breaker guarding one downstream service:
// - Closed: requests pass through; failures are counted
// - Open: requests are rejected immediately until the timeout elapses
// - Half-Open: a bounded number of probe calls test recovery
//
// The breaker is generic over the payload type its calls produce, so a
// registry keyed by (payload type, name) holds at most one breaker per
// downstream. All transitions happen under the breaker's own mutex and are
// observable through the `gateway_circuit_breaker_state` gauge.
//
// ============================================================================

mod registry;

pub use registry::BreakerRegistry;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use portico_config::CircuitBreakerConfig;
use portico_error::{AppError, AppResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Rolling request counts for the current window
#[derive(Debug, Clone, Copy, Default)]
pub struct Counts {
    pub requests: u32,
    pub successes: u32,
    pub failures: u32,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl Counts {
    fn record(&mut self, success: bool) {
        self.requests += 1;
        if success {
            self.successes += 1;
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }
    }
}

struct Inner {
    state: CircuitState,
    counts: Counts,
    /// Start of the rolling window (closed) or of the open period
    state_since: Instant,
    half_open_inflight: u32,
    /// Bumped on every transition so late results from a previous period
    /// cannot corrupt the current one
    generation: u64,
}

/// Circuit breaker for one named downstream, generic over the payload type
/// of the calls it guards
pub struct Breaker<T> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Breaker<T> {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                counts: Counts::default(),
                state_since: Instant::now(),
                half_open_inflight: 0,
                generation: 0,
            }),
            _payload: PhantomData,
        }
    }

    /// Current state, refreshing the open -> half-open timeout first
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.refresh(&mut inner);
        inner.state
    }

    pub fn counts(&self) -> Counts {
        self.inner.lock().expect("breaker mutex poisoned").counts
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Run `operation` through the breaker. If the breaker is open the
    /// operation is not invoked and the call fails immediately; otherwise
    /// the outcome is recorded. Errors from the operation (including
    /// timeouts and cancellation surfaced as errors) count as failures.
    pub async fn call<F, Fut>(&self, operation: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let generation = self.before()?;
        let result = operation().await;
        self.after(generation, result.is_ok());
        result
    }

    /// Like [`Breaker::call`], but on breaker rejection or operation failure the
    /// fallback runs and its result is returned. If the fallback fails too,
    /// both errors are composed into one.
    pub async fn call_with_fallback<F, Fut, FB, FutB>(
        &self,
        operation: F,
        fallback: FB,
    ) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = AppResult<T>>,
    {
        let primary_err = match self.before() {
            Ok(generation) => match operation().await {
                Ok(value) => {
                    self.after(generation, true);
                    return Ok(value);
                }
                Err(e) => {
                    self.after(generation, false);
                    e
                }
            },
            Err(e) => e,
        };

        match fallback().await {
            Ok(value) => Ok(value),
            Err(fallback_err) => Err(AppError::internal(format!(
                "fail to perform primary handler: {primary_err} and fallback: {fallback_err}"
            ))),
        }
    }

    /// Admission check; returns the generation the caller belongs to
    fn before(&self) -> AppResult<u64> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(inner.generation),
            CircuitState::Open => Err(AppError::BreakerOpen(self.name.clone())),
            CircuitState::HalfOpen => {
                if inner.half_open_inflight >= self.config.max_requests {
                    return Err(AppError::BreakerOpen(self.name.clone()));
                }
                inner.half_open_inflight += 1;
                Ok(inner.generation)
            }
        }
    }

    /// Record an outcome observed by a caller admitted at `generation`
    fn after(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if inner.generation != generation {
            // the breaker moved on while this call was in flight
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.counts.record(success);
                if !success && self.should_trip(&inner.counts) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                inner.counts.record(success);
                if !success {
                    self.transition(&mut inner, CircuitState::Open);
                } else if inner.counts.consecutive_successes >= self.config.max_requests {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn should_trip(&self, counts: &Counts) -> bool {
        if counts.consecutive_failures > self.config.failure_threshold {
            return true;
        }
        counts.requests >= self.config.min_requests
            && counts.failures as f64 / counts.requests as f64 >= self.config.failure_rate_threshold
    }

    /// Elapse-driven transitions: the open timeout and the closed-state
    /// rolling window
    fn refresh(&self, inner: &mut Inner) {
        match inner.state {
            CircuitState::Open => {
                if inner.state_since.elapsed() >= Duration::from_secs(self.config.timeout_secs) {
                    self.transition(inner, CircuitState::HalfOpen);
                }
            }
            CircuitState::Closed => {
                let interval = Duration::from_secs(self.config.interval_secs);
                if !interval.is_zero() && inner.state_since.elapsed() >= interval {
                    // new rolling window
                    inner.counts = Counts::default();
                    inner.state_since = Instant::now();
                    inner.generation += 1;
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.counts = Counts::default();
        inner.state_since = Instant::now();
        inner.half_open_inflight = 0;
        inner.generation += 1;

        portico_metrics::CIRCUIT_BREAKER_STATE
            .with_label_values(&[&self.name])
            .set(to.as_gauge());

        match to {
            CircuitState::Open => {
                tracing::warn!(breaker = %self.name, ?from, "circuit breaker opened")
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "circuit breaker transitioning to half-open")
            }
            CircuitState::Closed => {
                tracing::info!(breaker = %self.name, "circuit breaker closed after recovery")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(failure_threshold: u32, timeout_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_requests: 2,
            interval_secs: 30,
            timeout_secs,
            failure_threshold,
            failure_rate_threshold: 1.1, // rate tripping disabled unless a test wants it
            min_requests: u32::MAX,
        }
    }

    async fn fail(breaker: &Breaker<u32>) {
        let _ = breaker
            .call(|| async { Err::<u32, _>(AppError::bus("downstream boom")) })
            .await;
    }

    #[tokio::test]
    async fn test_trips_open_after_threshold_exceeded() {
        let breaker = Breaker::<u32>::new("order", config(3, 60));

        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        // fourth consecutive failure strictly exceeds the threshold
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_invoking() {
        let breaker = Breaker::<u32>::new("order", config(0, 60));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(AppError::BreakerOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_closes() {
        let breaker = Breaker::<u32>::new("order", config(0, 0));
        fail(&breaker).await;

        // timeout of zero: next observation moves straight to half-open
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // max_requests = 2 successful probes close the breaker
        breaker.call(|| async { Ok(1) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.call(|| async { Ok(2) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let breaker = Breaker::<u32>::new("order", config(0, 0));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        fail(&breaker).await;
        // a failed probe reopens immediately; the zero timeout means the
        // state observation flips back to half-open, so check counts reset
        assert_eq!(breaker.counts().requests, 0);
    }

    #[tokio::test]
    async fn test_failure_rate_trips_after_min_requests() {
        let cfg = CircuitBreakerConfig {
            max_requests: 1,
            interval_secs: 30,
            timeout_secs: 60,
            failure_threshold: 100, // consecutive tripping out of the way
            failure_rate_threshold: 0.5,
            min_requests: 4,
        };
        let breaker = Breaker::<u32>::new("order", cfg);

        breaker.call(|| async { Ok(1) }).await.unwrap();
        fail(&breaker).await;
        breaker.call(|| async { Ok(1) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // 2 failures / 4 requests = 0.5 >= threshold
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_fallback_runs_on_rejection() {
        let breaker = Breaker::<u32>::new("order", config(0, 60));
        fail(&breaker).await;
        assert!(breaker.is_open());

        let value = breaker
            .call_with_fallback(
                || async { Ok(1) },
                || async { Ok(42) },
            )
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_fallback_errors_compose() {
        let breaker = Breaker::<u32>::new("order", config(5, 60));

        let err = breaker
            .call_with_fallback(
                || async { Err(AppError::bus("primary down")) },
                || async { Err(AppError::bus("fallback down")) },
            )
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("primary down"));
        assert!(message.contains("fallback down"));
    }
}
