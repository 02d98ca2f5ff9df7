//! Domain events for keel applications
//!
//! Business logic queues [`DomainEvent`]s on the [`EventBus`]; the bus
//! drains them in order to the mediator's notification handlers and, for
//! events that opt in, to an external [`MessagingAdapter`](keel_core::MessagingAdapter).
//!
//! ## Features
//!
//! - **Ordered drain** - FIFO, stop at first failure, failed events stay queued
//! - **Circuit breaker** - every drain runs inside the bus breaker
//! - **Middleware** - [`PublishEventsMiddleware`] drains after each request
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel_events::*;
//! use keel_mediator::{Mediator, Notification, notification_fn};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, serde::Serialize)]
//! struct UserCreated {
//!     #[serde(skip)]
//!     meta: EventMetadata,
//!     email: String,
//! }
//!
//! impl Notification for UserCreated {}
//!
//! impl DomainEvent for UserCreated {
//!     fn metadata(&self) -> &EventMetadata { &self.meta }
//!     fn metadata_mut(&mut self) -> &mut EventMetadata { &mut self.meta }
//! }
//!
//! let mediator = Arc::new(Mediator::builder().build());
//! mediator.register_notification_handler(notification_fn(|_ctx, e: UserCreated| async move {
//!     println!("welcome {}", e.email);
//!     Ok(())
//! }))?;
//!
//! let bus = EventBus::builder(mediator.clone()).build();
//! mediator.register_middleware(PublishEventsMiddleware::new(&bus));
//!
//! bus.add_domain_event(UserCreated {
//!     meta: EventMetadata::new("users"),
//!     email: "alice@example.com".into(),
//! });
//! bus.publish_domain_events(&Context::background()).await?;
//! ```

pub mod bus;
pub mod event;
pub mod middleware;

pub use bus::{EventBus, EventBusBuilder, EventBusConfig};
pub use event::{DomainEvent, EventMetadata};
pub use middleware::PublishEventsMiddleware;
