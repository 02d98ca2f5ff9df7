// Keel - application plumbing for request dispatch, domain events and state
//
// This crate re-exports the keel member crates and provides the `Keel`
// composition root that wires them together at startup.

pub use keel_core::*;

pub use keel_events as events;
pub use keel_log as log;
pub use keel_mediator as mediator;
pub use keel_state as state;

pub use keel_events::{
    DomainEvent, EventBus, EventBusBuilder, EventBusConfig, EventMetadata,
    PublishEventsMiddleware,
};
pub use keel_log::Logger;
pub use keel_mediator::{
    GuardMiddleware, LoggingMiddleware, Mediator, MediatorBuilder, MediatorConfig, Middleware,
    Next, Notification, NotificationHandler, PerformanceMiddleware, RecoveryMiddleware, Request,
    RequestHandler, ValidationError, ValidationMiddleware, handler_fn, notification_fn,
};
pub use keel_state::{CacheConfig, CacheProxy, StateService, StateServiceConfig};

mod app;

pub use app::{Keel, KeelBuilder};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::app::{Keel, KeelBuilder};
    pub use keel_core::{
        CircuitBreakerConfig, Context, Entity, EntityBase, Error, ErrorKind, MessagingAdapter,
        Result, StateAdapter,
    };
    pub use keel_events::{DomainEvent, EventBus, EventBusConfig, EventMetadata};
    pub use keel_log::Logger;
    pub use keel_mediator::{
        Mediator, MediatorConfig, Middleware, Next, Notification, NotificationHandler, Request,
        RequestHandler, ValidationError, handler_fn, notification_fn,
    };
    pub use keel_state::{CacheConfig, StateService, StateServiceConfig};

    pub use async_trait::async_trait;
}
