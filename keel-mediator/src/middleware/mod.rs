//! Middleware system for request dispatch.
//!
//! Stages run in registration order and nest strictly: stage *i* sees the
//! result of stage *i + 1* before returning. The handler always runs last.
//!
//! A stage receives the request and a [`Next`] continuation. It may call
//! `next` at most once, skip it to short-circuit, or replace its result.
//! [`Next::run`] refuses to advance on a cancelled context.

mod guard;
mod logging;
mod performance;
mod recovery;
mod validation;

pub use guard::GuardMiddleware;
pub use logging::LoggingMiddleware;
pub use performance::PerformanceMiddleware;
pub use recovery::{PanicCallback, RecoveryMiddleware, catch_panic, panic_message};
pub use validation::ValidationMiddleware;

use crate::handler::DynRequestHandler;
use crate::request::{BoxedRequest, BoxedResponse};
use async_trait::async_trait;
use futures::future::BoxFuture;
use keel_core::{Context, Result};
use keel_log::Logger;
use std::sync::Arc;

type NextFn = Box<dyn FnOnce(Context, BoxedRequest) -> BoxFuture<'static, Result<BoxedResponse>> + Send>;

/// The rest of the chain, suspended.
pub struct Next {
    inner: NextFn,
}

impl Next {
    /// Continuation from a closure. Useful for driving a single stage in tests.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Context, BoxedRequest) -> BoxFuture<'static, Result<BoxedResponse>>
            + Send
            + 'static,
    {
        Self { inner: Box::new(f) }
    }

    /// Advance to the next stage or the handler.
    ///
    /// Returns `Cancelled` without advancing if `ctx` is already cancelled.
    pub async fn run(self, ctx: &Context, request: BoxedRequest) -> Result<BoxedResponse> {
        ctx.check()?;
        (self.inner)(ctx.clone(), request).await
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Middleware trait for intercepting requests before they reach the handler
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and optionally pass it to the next stage
    async fn handle(&self, ctx: &Context, request: BoxedRequest, next: Next)
        -> Result<BoxedResponse>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Switch to the application-wide logger. Stages that log override this.
    fn adopt_logger(&mut self, _logger: &Logger) {}
}

/// Middleware chain executor
///
/// Cloning is cheap; the mediator snapshots the chain once per dispatch so
/// stages registered mid-flight only affect later requests.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Arc::new(Vec::new()),
        }
    }

    /// Append a stage.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        let mut mws = (*self.middlewares).clone();
        mws.push(middleware);
        self.middlewares = Arc::new(mws);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Execute the chain, ending in `handler`.
    pub(crate) async fn apply(
        &self,
        ctx: &Context,
        request: BoxedRequest,
        handler: Arc<dyn DynRequestHandler>,
    ) -> Result<BoxedResponse> {
        ctx.check()?;
        self.execute_from(0, ctx.clone(), request, handler).await
    }

    fn execute_from(
        &self,
        index: usize,
        ctx: Context,
        request: BoxedRequest,
        handler: Arc<dyn DynRequestHandler>,
    ) -> BoxFuture<'static, Result<BoxedResponse>> {
        if index >= self.middlewares.len() {
            Box::pin(async move { handler.handle_dyn(&ctx, request).await })
        } else {
            let middleware = self.middlewares[index].clone();
            let chain = self.clone();

            Box::pin(async move {
                let next = Next::new(move |ctx, request| {
                    chain.execute_from(index + 1, ctx, request, handler)
                });
                middleware.handle(&ctx, request, next).await
            })
        }
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.middlewares.iter().map(|m| m.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TypedRequestHandler;
    use crate::{Request, RequestHandler};
    use parking_lot::Mutex;

    struct Echo(u32);

    impl Request for Echo {
        type Response = u32;
    }

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler<Echo> for EchoHandler {
        async fn handle(&self, _ctx: &Context, request: Echo) -> Result<u32> {
            Ok(request.0)
        }
    }

    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Trace {
        async fn handle(
            &self,
            ctx: &Context,
            request: BoxedRequest,
            next: Next,
        ) -> Result<BoxedResponse> {
            self.log.lock().push(format!("enter {}", self.label));
            let result = next.run(ctx, request).await;
            self.log.lock().push(format!("exit {}", self.label));
            result
        }
    }

    fn handler() -> Arc<dyn DynRequestHandler> {
        Arc::new(TypedRequestHandler::new(EchoHandler))
    }

    #[tokio::test]
    async fn test_stages_nest_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        for label in ["a", "b"] {
            chain.push(Arc::new(Trace {
                label,
                log: log.clone(),
            }));
        }

        let response = chain
            .apply(&Context::background(), Box::new(Echo(9)), handler())
            .await
            .unwrap();

        assert_eq!(*response.downcast::<u32>().unwrap(), 9);
        assert_eq!(*log.lock(), vec!["enter a", "enter b", "exit b", "exit a"]);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_before_next() {
        struct CancelThenNext;

        #[async_trait]
        impl Middleware for CancelThenNext {
            async fn handle(
                &self,
                ctx: &Context,
                request: BoxedRequest,
                next: Next,
            ) -> Result<BoxedResponse> {
                ctx.cancel();
                next.run(ctx, request).await
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(CancelThenNext));
        chain.push(Arc::new(Trace {
            label: "inner",
            log: log.clone(),
        }));

        let err = chain
            .apply(&Context::background(), Box::new(Echo(1)), handler())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        let response = chain
            .apply(&Context::background(), Box::new(Echo(3)), handler())
            .await
            .unwrap();
        assert_eq!(*response.downcast::<u32>().unwrap(), 3);
    }
}
