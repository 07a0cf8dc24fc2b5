//! Circuit breaker state machine.
//!
//! One breaker per (caller service, callee service) pair, identified by
//! logical name. Transitions:
//! - closed -> open when consecutive failures reach `fail_max`
//! - open -> half-open after `timeout` has elapsed since opening
//! - half-open -> closed on a successful probe
//! - half-open -> open on a failed probe (timer resets)
//!
//! While open, calls short-circuit without touching the network. State is
//! process-local and lost on restart; services re-learn within seconds.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus::{IntCounterVec, IntGaugeVec, register_int_counter_vec, register_int_gauge_vec};
use thiserror::Error;
use tracing::{error, info, warn};

static BREAKER_CALLS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "circuit_breaker_calls_total",
        "Total circuit breaker calls",
        &["service", "target", "state", "result"]
    )
    .expect("register circuit_breaker_calls_total")
});

static BREAKER_STATE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=open, 2=half_open)",
        &["service", "target"]
    )
    .expect("register circuit_breaker_state")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub fail_max: u32,
    /// How long the circuit stays open before probing.
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            fail_max: 3,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker open for {target}")]
    Open { target: String },

    #[error(transparent)]
    Inner(E),
}

/// What the breaker observes about an operation's error.
pub trait BreakerObservable {
    /// Whether this error counts toward opening the circuit.
    fn counts_as_failure(&self) -> bool;
}

struct BreakerCore {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    service: String,
    target: String,
    config: BreakerConfig,
    core: Mutex<BreakerCore>,
}

impl CircuitBreaker {
    pub fn new(service: &str, target: &str, config: BreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            service: service.to_string(),
            target: target.to_string(),
            config,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current state, applying the open -> half-open timeout transition.
    pub fn state(&self) -> CircuitState {
        let mut core = self.core.lock();
        self.maybe_half_open(&mut core);
        core.state
    }

    fn maybe_half_open(&self, core: &mut BreakerCore) {
        if core.state == CircuitState::Open
            && core
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.timeout)
        {
            core.state = CircuitState::HalfOpen;
            core.probe_in_flight = false;
            self.set_gauge(CircuitState::HalfOpen);
            warn!(
                event_type = "circuit_half_open",
                service = %self.service,
                target = %self.target,
                "circuit breaker HALF-OPEN"
            );
        }
    }

    fn set_gauge(&self, state: CircuitState) {
        BREAKER_STATE
            .with_label_values(&[self.service.as_str(), self.target.as_str()])
            .set(state.gauge_value());
    }

    /// Try to admit one call. `None` means short-circuit.
    fn acquire(&self) -> Option<CallPermit<'_>> {
        let mut core = self.core.lock();
        self.maybe_half_open(&mut core);
        match core.state {
            CircuitState::Closed => Some(CallPermit::new(self, false)),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if core.probe_in_flight {
                    // Only one probe at a time; everything else short-circuits.
                    None
                } else {
                    core.probe_in_flight = true;
                    Some(CallPermit::new(self, true))
                }
            }
        }
    }

    fn on_success(&self) {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => core.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                core.state = CircuitState::Closed;
                core.consecutive_failures = 0;
                core.opened_at = None;
                core.probe_in_flight = false;
                self.set_gauge(CircuitState::Closed);
                info!(
                    event_type = "circuit_closed",
                    service = %self.service,
                    target = %self.target,
                    "circuit breaker CLOSED"
                );
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => {
                core.consecutive_failures += 1;
                if core.consecutive_failures >= self.config.fail_max {
                    self.open(&mut core);
                }
            }
            CircuitState::HalfOpen => self.open(&mut core),
            CircuitState::Open => {}
        }
    }

    fn open(&self, core: &mut BreakerCore) {
        core.state = CircuitState::Open;
        core.opened_at = Some(Instant::now());
        core.probe_in_flight = false;
        self.set_gauge(CircuitState::Open);
        error!(
            event_type = "circuit_opened",
            service = %self.service,
            target = %self.target,
            "circuit breaker OPENED"
        );
    }

    fn release_probe(&self) {
        let mut core = self.core.lock();
        if core.state == CircuitState::HalfOpen {
            core.probe_in_flight = false;
        }
    }

    fn record_call(&self, state: CircuitState, result: &str) {
        let state_label = state.to_string();
        BREAKER_CALLS
            .with_label_values(&[
                self.service.as_str(),
                self.target.as_str(),
                state_label.as_str(),
                result,
            ])
            .inc();
    }

    /// Execute `op` under the breaker.
    ///
    /// Short-circuits with [`BreakerError::Open`] while the circuit is open.
    /// Errors for which [`BreakerObservable::counts_as_failure`] is true
    /// move the state machine; others pass through untouched.
    pub async fn call<T, E, Fut>(&self, op: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: BreakerObservable,
    {
        let state = self.state();
        let Some(permit) = self.acquire() else {
            self.record_call(state, "short_circuit");
            return Err(BreakerError::Open {
                target: self.target.clone(),
            });
        };

        let result = op.await;
        match &result {
            Ok(_) => {
                permit.complete();
                self.on_success();
                self.record_call(state, "success");
            }
            Err(e) if e.counts_as_failure() => {
                permit.complete();
                self.on_failure();
                self.record_call(state, "failure");
            }
            Err(_) => {
                // Not a dependency failure (e.g. upstream 4xx); the probe
                // slot is released without moving the state machine.
                drop(permit);
                self.record_call(state, "rejected");
            }
        }
        result.map_err(BreakerError::Inner)
    }

    /// Like [`call`](Self::call), but an open circuit (or a counted failure)
    /// resolves to `fallback()` instead of an error.
    pub async fn call_with_fallback<T, E, Fut>(
        &self,
        op: Fut,
        fallback: impl FnOnce() -> T,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: BreakerObservable,
    {
        match self.call(op).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Open { target }) => {
                warn!(
                    event_type = "circuit_fallback",
                    target = %target,
                    "circuit open, using fallback"
                );
                Ok(fallback())
            }
            Err(BreakerError::Inner(e)) if e.counts_as_failure() => {
                warn!(
                    event_type = "circuit_fallback",
                    target = %self.target,
                    "dependency failure, using fallback"
                );
                Ok(fallback())
            }
            Err(BreakerError::Inner(e)) => Err(e),
        }
    }
}

/// Releases the half-open probe slot when a call is cancelled mid-flight.
///
/// Cancellation must not count as a breaker failure, but it must not leave
/// the probe slot occupied either.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    is_probe: bool,
    completed: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, is_probe: bool) -> Self {
        Self {
            breaker,
            is_probe,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.completed && self.is_probe {
            self.breaker.release_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("test error (transport={transport})")]
    struct TestError {
        transport: bool,
    }

    impl BreakerObservable for TestError {
        fn counts_as_failure(&self) -> bool {
            self.transport
        }
    }

    fn failing() -> Result<(), TestError> {
        Err(TestError { transport: true })
    }

    fn breaker(fail_max: u32, timeout: Duration) -> Arc<CircuitBreaker> {
        CircuitBreaker::new(
            "profile-service",
            "data-service",
            BreakerConfig { fail_max, timeout },
        )
    }

    #[tokio::test]
    async fn opens_after_exactly_fail_max_failures() {
        let cb = breaker(3, Duration::from_secs(60));
        for _ in 0..2 {
            let _ = cb.call(async { failing() }).await;
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        let _ = cb.call(async { failing() }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_without_calling() {
        let cb = breaker(1, Duration::from_secs(60));
        let _ = cb.call(async { failing() }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let mut called = false;
        let result = cb
            .call(async {
                called = true;
                Ok::<_, TestError>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert!(!called, "no real call may be issued while open");
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60));
        let _ = cb.call(async { failing() }).await;
        let _ = cb.call(async { Ok::<_, TestError>(()) }).await;
        let _ = cb.call(async { failing() }).await;
        let _ = cb.call(async { failing() }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_success_closes_probe_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(20));
        let _ = cb.call(async { failing() }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Failed probe reopens and resets the timer.
        let _ = cb.call(async { failing() }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = cb.call(async { Ok::<_, TestError>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn non_failure_errors_do_not_move_the_machine() {
        let cb = breaker(1, Duration::from_secs(60));
        let result = cb
            .call(async { Err::<(), _>(TestError { transport: false }) })
            .await;
        assert!(matches!(result, Err(BreakerError::Inner(_))));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn fallback_used_when_open() {
        let cb = breaker(1, Duration::from_secs(60));
        let _ = cb.call(async { failing() }).await;

        let value = cb
            .call_with_fallback(async { Ok::<_, TestError>("sent") }, || "queued")
            .await
            .unwrap();
        assert_eq!(value, "queued");
    }
}
