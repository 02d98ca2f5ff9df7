//! # Resilience
//!
//! Fault isolation for adapter calls.
//!
//! - **Circuit Breaker**: fail fast while a dependency is unhealthy, test
//!   for recovery after a break
//!
//! Both the state service and the event bus wrap their adapter traffic in a
//! [`CircuitBreaker`].

mod circuit_breaker;

pub use circuit_breaker::*;
