//! Mediator for keel applications
//!
//! Routes a request to exactly one handler through an ordered middleware
//! chain, and a notification to at most one handler.
//!
//! ## Features
//!
//! - **Type-keyed dispatch** - one stable [`TypeKey`](keel_core::TypeKey) per request shape
//! - **Middleware** - validation, logging, performance, panic recovery and guard stages
//! - **Cancellation** - a cancelled [`Context`](keel_core::Context) stops the chain
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel_mediator::*;
//! use keel_core::{Context, Result};
//! use async_trait::async_trait;
//!
//! struct CreateUser {
//!     email: String,
//! }
//!
//! impl Request for CreateUser {
//!     type Response = String;
//! }
//!
//! struct CreateUserHandler;
//!
//! #[async_trait]
//! impl RequestHandler<CreateUser> for CreateUserHandler {
//!     async fn handle(&self, _ctx: &Context, request: CreateUser) -> Result<String> {
//!         Ok(format!("user-{}", request.email))
//!     }
//! }
//!
//! let mediator = Mediator::builder()
//!     .middleware(ValidationMiddleware::new())
//!     .build();
//! mediator.register_handler::<CreateUser, _>(CreateUserHandler)?;
//!
//! let id = mediator
//!     .send(&Context::background(), CreateUser { email: "alice@example.com".into() })
//!     .await?;
//! ```

pub mod handler;
pub mod mediator;
pub mod middleware;
pub mod request;

pub use handler::{
    FnHandler, FnNotificationHandler, NotificationHandler, RequestHandler, handler_fn,
    notification_fn,
};
pub use mediator::{Mediator, MediatorBuilder, MediatorConfig};
pub use middleware::{
    GuardMiddleware, LoggingMiddleware, Middleware, MiddlewareChain, Next, PerformanceMiddleware,
    RecoveryMiddleware, ValidationMiddleware,
};
pub use request::{
    AnyNotification, AnyRequest, BoxedRequest, BoxedResponse, Notification, Request,
    ValidationError,
};
