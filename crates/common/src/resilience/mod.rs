//! Resilience patterns for protecting external dependencies.

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState, ConfigError,
};
