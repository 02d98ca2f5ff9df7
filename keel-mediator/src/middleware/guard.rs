//! Predicate-driven guard stage.

use super::{Middleware, Next};
use crate::request::{AnyRequest, BoxedRequest, BoxedResponse};
use async_trait::async_trait;
use keel_core::{Context, Error, Result};
use std::sync::Arc;

type GuardFn = Arc<dyn Fn(&Context, &dyn AnyRequest) -> bool + Send + Sync>;

/// Lets a request through only when the predicate holds.
///
/// Rejected requests fail with `MiddlewareBlocked` and never reach the
/// handler.
///
/// ```rust,ignore
/// let admin_only = GuardMiddleware::new("admin-only", |_ctx, request| {
///     request.as_any().downcast_ref::<DeleteUser>().is_none() || is_admin()
/// });
/// ```
pub struct GuardMiddleware {
    name: String,
    predicate: GuardFn,
}

impl GuardMiddleware {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Context, &dyn AnyRequest) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }
}

#[async_trait]
impl Middleware for GuardMiddleware {
    async fn handle(
        &self,
        ctx: &Context,
        request: BoxedRequest,
        next: Next,
    ) -> Result<BoxedResponse> {
        if !(self.predicate)(ctx, request.as_ref()) {
            return Err(Error::MiddlewareBlocked(format!(
                "{} rejected {}",
                self.name,
                request.request_key()
            )));
        }
        next.run(ctx, request).await
    }

    fn name(&self) -> &'static str {
        "guard"
    }
}
