//! Shared foundation for the keel crates.
//!
//! - [`Error`] and [`ErrorKind`]: the error sentinels every component returns
//! - [`Context`]: cancellation, deadlines and correlation ids
//! - [`TypeKey`]: stable identifiers for dispatch
//! - [`EntityBase`]: audit fields embedded in domain entities
//! - [`StateAdapter`] and [`MessagingAdapter`]: ports implemented outside keel
//! - [`resilience::CircuitBreaker`]: fault isolation around adapter calls

pub mod adapter;
pub mod context;
pub mod entity;
pub mod error;
pub mod resilience;
pub mod type_key;

pub use adapter::*;
pub use context::Context;
pub use entity::{Entity, EntityBase};
pub use error::{BoxError, Error, ErrorKind, Result};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, Counts,
};
pub use type_key::TypeKey;
