//! Failure containment: circuit breakers and backoff schedules.

mod backoff;
mod circuit_breaker;
mod registry;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStats};
pub use registry::CircuitBreakerRegistry;
