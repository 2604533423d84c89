//! # DocFlow Common
//!
//! Cross-cutting utilities with no domain knowledge:
//! - [`time`]: a `Clock` abstraction so time-dependent behavior can be tested
//!   deterministically
//! - [`resilience`]: the circuit breaker guarding external callouts
//! - [`observability`]: atomic pipeline metrics with a Prometheus text render
//!
//! ## Architecture
//! - No dependencies on other DocFlow crates
//! - Only external dependencies allowed

pub mod observability;
pub mod resilience;
pub mod time;

pub use observability::{MetricsSnapshot, PipelineMetrics};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState, ConfigError,
};
pub use time::{Clock, MockClock, SystemClock};
