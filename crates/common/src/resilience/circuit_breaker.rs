//! Circuit breaker guarding slow or failing external callouts.
//!
//! The breaker's entire state is one tagged variant (the three states carry
//! different fields) held behind an [`ArcSwap`] and replaced only through
//! compare-and-set loops, so concurrent callers observe a consistent state
//! without locks.
//!
//! Transition rules:
//! - **Closed**: a success resets the consecutive-failure counter; the N-th
//!   consecutive failure opens the circuit and timestamps the opening.
//! - **Open**: every call fails fast with [`CircuitOpenError`]. Once the open
//!   window has elapsed, the next caller observes the transition to half-open
//!   and is admitted as a probe.
//! - **HalfOpen**: at most `half_open_max_attempts` probes are admitted; a
//!   success closes the circuit, a failure re-opens it with a fresh
//!   timestamp.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::time::{Clock, SystemClock};

/// Simple configuration error for validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// The circuit is open; the call was rejected without invoking the delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is open, rejecting calls")]
pub struct CircuitOpenError;

/// Public view of the breaker state, for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to dwell in the open state before admitting a probe.
    pub open_duration: Duration,
    /// Maximum probes admitted in the half-open state before a decision.
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_max_attempts: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.half_open_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "half_open_max_attempts must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Internal state as a sum type; each variant carries only its own fields.
#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

/// Circuit breaker with compare-and-set state transitions.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: ArcSwap<BreakerState>,
    clock: Arc<C>,
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: ArcSwap::from_pointee(BreakerState::Closed { consecutive_failures: 0 }),
            clock: Arc::new(clock),
        })
    }

    /// Ask for permission to make one call.
    ///
    /// Returns `Ok(())` when the call may proceed. The caller must report the
    /// outcome via [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure); an `Err` means the call was
    /// rejected without reaching the delegate and nothing should be recorded.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        loop {
            let current = self.state.load();
            match **current {
                BreakerState::Closed { .. } => return Ok(()),
                BreakerState::Open { opened_at } => {
                    if self.clock.now().duration_since(opened_at) < self.config.open_duration {
                        return Err(CircuitOpenError);
                    }
                    // Open window elapsed: this caller becomes the first probe.
                    let next = Arc::new(BreakerState::HalfOpen { attempts: 1 });
                    if self.swap(&current, next) {
                        debug!("circuit breaker transitioned to half-open");
                        return Ok(());
                    }
                }
                BreakerState::HalfOpen { attempts } => {
                    if attempts >= self.config.half_open_max_attempts {
                        return Err(CircuitOpenError);
                    }
                    let next = Arc::new(BreakerState::HalfOpen { attempts: attempts + 1 });
                    if self.swap(&current, next) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        loop {
            let current = self.state.load();
            let next = match **current {
                BreakerState::Closed { consecutive_failures: 0 } => return,
                BreakerState::Closed { .. } | BreakerState::HalfOpen { .. } => {
                    BreakerState::Closed { consecutive_failures: 0 }
                }
                // A stale probe finishing after the circuit re-opened.
                BreakerState::Open { .. } => return,
            };
            let was_half_open = matches!(**current, BreakerState::HalfOpen { .. });
            if self.swap(&current, Arc::new(next)) {
                if was_half_open {
                    debug!("circuit breaker closed after successful probe");
                }
                return;
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        loop {
            let current = self.state.load();
            let now = self.clock.now();
            let next = match **current {
                BreakerState::Closed { consecutive_failures } => {
                    let failures = consecutive_failures.saturating_add(1);
                    if failures >= self.config.failure_threshold {
                        BreakerState::Open { opened_at: now }
                    } else {
                        BreakerState::Closed { consecutive_failures: failures }
                    }
                }
                // Any failure in half-open immediately re-opens with a fresh
                // timestamp.
                BreakerState::HalfOpen { .. } => BreakerState::Open { opened_at: now },
                BreakerState::Open { .. } => return,
            };
            let opens = matches!(next, BreakerState::Open { .. });
            if self.swap(&current, Arc::new(next)) {
                if opens {
                    warn!("circuit breaker opened");
                }
                return;
            }
        }
    }

    /// Current state, for logging and metrics.
    pub fn state_kind(&self) -> CircuitState {
        match **self.state.load() {
            BreakerState::Closed { .. } => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Compare-and-set helper: true when `next` replaced `current`.
    fn swap(
        &self,
        current: &arc_swap::Guard<Arc<BreakerState>>,
        next: Arc<BreakerState>,
    ) -> bool {
        let previous = self.state.compare_and_swap(&**current, next);
        Arc::ptr_eq(&*previous, &**current)
    }
}

impl<C: Clock> std::fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state_kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::time::MockClock;

    use super::*;

    fn breaker(threshold: u32, open_ms: u64, probes: u32) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_millis(open_ms),
            half_open_max_attempts: probes,
        };
        let cb = CircuitBreaker::with_clock(config, clock.clone()).expect("valid config");
        (cb, clock)
    }

    #[test]
    fn config_validation_rejects_zeroes() {
        let bad = CircuitBreakerConfig { failure_threshold: 0, ..Default::default() };
        assert!(bad.validate().is_err());

        let bad = CircuitBreakerConfig { half_open_max_attempts: 0, ..Default::default() };
        assert!(bad.validate().is_err());

        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn closed_circuit_admits_calls() {
        let (cb, _clock) = breaker(3, 500, 1);
        assert_eq!(cb.state_kind(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (cb, _clock) = breaker(3, 500, 1);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        // Only two consecutive failures since the success: still closed.
        assert_eq!(cb.state_kind(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state_kind(), CircuitState::Open);
    }

    #[test]
    fn opens_at_threshold_and_fails_fast() {
        let (cb, _clock) = breaker(3, 500, 1);

        for _ in 0..3 {
            assert!(cb.try_acquire().is_ok());
            cb.record_failure();
        }

        assert_eq!(cb.state_kind(), CircuitState::Open);
        assert_eq!(cb.try_acquire(), Err(CircuitOpenError));
    }

    #[test]
    fn open_circuit_admits_probe_after_window() {
        let (cb, clock) = breaker(3, 500, 1);

        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.try_acquire(), Err(CircuitOpenError));

        clock.advance_millis(600);

        // First caller after the window becomes the probe.
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state_kind(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state_kind(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_window() {
        let (cb, clock) = breaker(1, 500, 1);

        cb.record_failure();
        clock.advance_millis(600);
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state_kind(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state_kind(), CircuitState::Open);

        // The open window restarts at the half-open failure, not the
        // original opening.
        clock.advance_millis(400);
        assert_eq!(cb.try_acquire(), Err(CircuitOpenError));
        clock.advance_millis(200);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn half_open_caps_concurrent_probes() {
        let (cb, clock) = breaker(1, 500, 2);

        cb.record_failure();
        clock.advance_millis(600);

        assert!(cb.try_acquire().is_ok());
        assert!(cb.try_acquire().is_ok());
        // Third concurrent probe is rejected until a decision lands.
        assert_eq!(cb.try_acquire(), Err(CircuitOpenError));

        cb.record_success();
        assert_eq!(cb.state_kind(), CircuitState::Closed);
    }

    #[test]
    fn stale_success_while_open_is_ignored() {
        let (cb, _clock) = breaker(1, 500, 1);
        cb.record_failure();
        assert_eq!(cb.state_kind(), CircuitState::Open);

        cb.record_success();
        assert_eq!(cb.state_kind(), CircuitState::Open);
    }

    #[tokio::test]
    async fn concurrent_failures_open_exactly_once() {
        let (cb, _clock) = breaker(10, 500, 1);
        let cb = std::sync::Arc::new(cb);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cb = std::sync::Arc::clone(&cb);
            handles.push(tokio::spawn(async move {
                cb.record_failure();
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        assert_eq!(cb.state_kind(), CircuitState::Open);
    }
}
