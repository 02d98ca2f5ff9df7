//! State access for keel applications.
//!
//! [`StateService`] guards a [`StateAdapter`](keel_core::StateAdapter) with a
//! circuit breaker and, optionally, a [`CacheProxy`]: an in-memory TTL cache
//! with write-through or batched writes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel_state::*;
//! use std::time::Duration;
//!
//! let state = StateService::new(
//!     adapter,
//!     StateServiceConfig::new().cache(
//!         CacheConfig::new()
//!             .item_expiration(Duration::from_secs(60))
//!             .batched(Duration::from_secs(1), Duration::from_secs(5)),
//!     ),
//! );
//!
//! state.set(&ctx, "session:42", &session).await?;
//! let session: Option<Session> = state.get(&ctx, "session:42").await?;
//! state.shutdown().await;
//! ```

pub mod cache;
pub mod config;
pub mod service;

pub use cache::CacheProxy;
pub use config::{CacheConfig, StateServiceConfig};
pub use service::StateService;
