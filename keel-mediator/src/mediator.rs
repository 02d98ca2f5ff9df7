//! The mediator: type-keyed dispatch through the middleware chain.

use crate::handler::{
    DynNotificationHandler, DynRequestHandler, NotificationHandler, RequestHandler,
    TypedNotificationHandler, TypedRequestHandler,
};
use crate::middleware::{
    Middleware, MiddlewareChain, PanicCallback, RecoveryMiddleware, catch_panic,
};
use crate::request::{AnyNotification, Notification, Request};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use keel_core::{Context, Error, Result, TypeKey};
use keel_log::Logger;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Mediator configuration
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    /// Requests slower than this are logged as warnings
    pub slow_request_threshold: Duration,
    /// Logging collaborator
    pub logger: Logger,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            slow_request_threshold: Duration::from_millis(500),
            logger: Logger::global(),
        }
    }
}

impl MediatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold = threshold;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

/// Routes requests to exactly one handler and notifications to at most one.
///
/// Handler lookup never blocks on registration. Registration may interleave
/// with dispatch, but should be finished before traffic is accepted.
pub struct Mediator {
    handlers: DashMap<TypeKey, Arc<dyn DynRequestHandler>>,
    notification_handlers: DashMap<TypeKey, Arc<dyn DynNotificationHandler>>,
    middleware: RwLock<MiddlewareChain>,
    config: MediatorConfig,
}

impl Mediator {
    /// Mediator with no stages.
    pub fn new() -> Self {
        Self::with_config(MediatorConfig::default())
    }

    pub fn with_config(config: MediatorConfig) -> Self {
        Self {
            handlers: DashMap::new(),
            notification_handlers: DashMap::new(),
            middleware: RwLock::new(MiddlewareChain::new()),
            config,
        }
    }

    /// Builder that installs panic recovery as the outermost stage.
    pub fn builder() -> MediatorBuilder {
        MediatorBuilder::new()
    }

    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    /// Register the handler for `R`.
    ///
    /// Fails with `AlreadyRegistered` if `R`'s key is taken.
    pub fn register_handler<R, H>(&self, handler: H) -> Result<()>
    where
        R: Request,
        H: RequestHandler<R> + 'static,
    {
        let key = R::type_key();
        match self.handlers.entry(key) {
            Entry::Occupied(entry) => Err(Error::AlreadyRegistered(entry.key().to_string())),
            Entry::Vacant(entry) => {
                keel_log::debug!(logger: self.config.logger, "Registered handler for {}", entry.key());
                entry.insert(Arc::new(TypedRequestHandler::new(handler)));
                Ok(())
            }
        }
    }

    /// Register the handler for notification `N`.
    pub fn register_notification_handler<N, H>(&self, handler: H) -> Result<()>
    where
        N: Notification,
        H: NotificationHandler<N> + 'static,
    {
        let key = N::type_key();
        match self.notification_handlers.entry(key) {
            Entry::Occupied(entry) => Err(Error::AlreadyRegistered(entry.key().to_string())),
            Entry::Vacant(entry) => {
                keel_log::debug!(
                    logger: self.config.logger,
                    "Registered notification handler for {}",
                    entry.key()
                );
                entry.insert(Arc::new(TypedNotificationHandler::new(handler)));
                Ok(())
            }
        }
    }

    /// Append a stage. Stages run in registration order.
    pub fn register_middleware<M: Middleware + 'static>(&self, middleware: M) {
        self.register_middleware_arc(Arc::new(middleware));
    }

    pub fn register_middleware_arc(&self, middleware: Arc<dyn Middleware>) {
        keel_log::debug!(logger: self.config.logger, "Registered middleware {}", middleware.name());
        self.middleware.write().push(middleware);
    }

    pub fn has_handler<R: Request>(&self) -> bool {
        self.handlers.contains_key(&R::type_key())
    }

    pub fn has_notification_handler<N: Notification>(&self) -> bool {
        self.notification_handlers.contains_key(&N::type_key())
    }

    /// Number of registered request handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn notification_handler_count(&self) -> usize {
        self.notification_handlers.len()
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.read().len()
    }

    /// Dispatch `request` through the middleware chain to its handler.
    ///
    /// Fails with `HandlerNotFound` when nothing is registered for the
    /// request's key. If the context is cancelled when the chain returns an
    /// error, the cancellation is reported instead.
    pub async fn send<R: Request>(&self, ctx: &Context, request: R) -> Result<R::Response> {
        let key = R::type_key();
        let handler = self
            .handlers
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::HandlerNotFound(key.to_string()))?;
        let chain = self.middleware.read().clone();

        let start = Instant::now();
        let result = chain.apply(ctx, Box::new(request), handler).await;
        let elapsed = start.elapsed();
        if elapsed > self.config.slow_request_threshold {
            keel_log::warn!(
                logger: self.config.logger,
                "Slow request {}: {:?} (threshold {:?})",
                key,
                elapsed,
                self.config.slow_request_threshold
            );
        }

        let response = match result {
            Err(err) if ctx.is_cancelled() && !err.is_cancelled() => {
                return Err(ctx.cancellation_error());
            }
            other => other?,
        };

        response
            .downcast::<R::Response>()
            .map(|response| *response)
            .map_err(|_| Error::internal(format!("response type mismatch for {}", key)))
    }

    /// Deliver `notification` to its handler and return the handler's error.
    pub async fn publish<N: Notification>(&self, ctx: &Context, notification: &N) -> Result<()> {
        self.publish_dyn(ctx, notification).await
    }

    /// Type-erased [`publish`](Self::publish).
    ///
    /// A panic inside the handler is reported as `Internal`.
    pub async fn publish_dyn(&self, ctx: &Context, notification: &dyn AnyNotification) -> Result<()> {
        let key = notification.notification_key();
        let handler = self
            .notification_handlers
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::HandlerNotFound(key.to_string()))?;
        ctx.check()?;

        let result = catch_panic(handler.handle_dyn(ctx, notification.as_any())).await;
        if let Err(err) = &result {
            keel_log::debug!(
                logger: self.config.logger,
                "Notification {} failed: {}",
                key,
                err
            );
        }
        result
    }
}

impl Default for Mediator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("handlers", &self.handlers.len())
            .field("notification_handlers", &self.notification_handlers.len())
            .field("middleware", &*self.middleware.read())
            .finish()
    }
}

/// Builder for [`Mediator`].
pub struct MediatorBuilder {
    config: MediatorConfig,
    recovery: bool,
    on_panic: Option<PanicCallback>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MediatorBuilder {
    pub fn new() -> Self {
        Self {
            config: MediatorConfig::default(),
            recovery: true,
            on_panic: None,
            middleware: Vec::new(),
        }
    }

    pub fn config(mut self, config: MediatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.config.logger = logger;
        self
    }

    pub fn slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_request_threshold = threshold;
        self
    }

    /// Skip the panic recovery stage.
    pub fn without_recovery(mut self) -> Self {
        self.recovery = false;
        self
    }

    /// Callback for panics trapped by the recovery stage.
    pub fn on_panic<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TypeKey, &str) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(callback));
        self
    }

    /// Append a stage after recovery.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> Mediator {
        let mediator = Mediator::with_config(self.config);
        if self.recovery {
            mediator.register_middleware(
                RecoveryMiddleware::new()
                    .logger(mediator.config.logger.clone())
                    .with_callback(self.on_panic),
            );
        }
        for middleware in self.middleware {
            mediator.register_middleware_arc(middleware);
        }
        mediator
    }
}

impl Default for MediatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, notification_fn};
    use crate::middleware::{GuardMiddleware, ValidationMiddleware};
    use crate::request::ValidationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Double(i64);

    impl Request for Double {
        type Response = i64;

        fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
            if self.0 < 0 {
                Err(vec![ValidationError::new("value", "must be non-negative")])
            } else {
                Ok(())
            }
        }
    }

    struct DoubleHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RequestHandler<Double> for DoubleHandler {
        async fn handle(&self, _ctx: &Context, request: Double) -> Result<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(request.0 * 2)
        }
    }

    #[derive(Debug, Clone)]
    struct UserCreated {
        email: String,
    }

    impl Notification for UserCreated {}

    fn quiet() -> MediatorBuilder {
        Mediator::builder().logger(Logger::null())
    }

    #[tokio::test]
    async fn test_send_invokes_handler_once() {
        let mediator = quiet().build();
        let calls = Arc::new(AtomicUsize::new(0));
        mediator
            .register_handler::<Double, _>(DoubleHandler {
                calls: calls.clone(),
            })
            .unwrap();

        let value = mediator.send(&Context::background(), Double(21)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_without_handler() {
        let mediator = quiet().build();
        let err = mediator
            .send(&Context::background(), Double(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), keel_core::ErrorKind::HandlerNotFound);
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let mediator = quiet().build();
        mediator
            .register_handler(handler_fn(|_ctx, r: Double| async move { Ok(r.0) }))
            .unwrap();
        let err = mediator
            .register_handler(handler_fn(|_ctx, r: Double| async move { Ok(r.0 + 1) }))
            .unwrap_err();

        assert_eq!(err.kind(), keel_core::ErrorKind::AlreadyRegistered);
        assert_eq!(mediator.handler_count(), 1);
        assert!(mediator.has_handler::<Double>());
    }

    #[tokio::test]
    async fn test_validation_short_circuits_handler() {
        let mediator = quiet()
            .middleware(ValidationMiddleware::new().logger(Logger::null()))
            .build();
        let calls = Arc::new(AtomicUsize::new(0));
        mediator
            .register_handler::<Double, _>(DoubleHandler {
                calls: calls.clone(),
            })
            .unwrap();

        let err = mediator
            .send(&Context::background(), Double(-1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), keel_core::ErrorKind::BadRequest);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(mediator.middleware_count(), 2);
    }

    #[tokio::test]
    async fn test_handler_panic_is_recovered() {
        let mediator = quiet().build();
        mediator
            .register_handler(handler_fn(|_ctx, r: Double| async move {
                if r.0 == 0 {
                    panic!("division by zero");
                }
                Ok(r.0)
            }))
            .unwrap();

        let err = mediator
            .send(&Context::background(), Double(0))
            .await
            .unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    async fn test_cancelled_context_does_not_reach_handler() {
        let mediator = quiet().build();
        let calls = Arc::new(AtomicUsize::new(0));
        mediator
            .register_handler::<Double, _>(DoubleHandler {
                calls: calls.clone(),
            })
            .unwrap();

        let ctx = Context::background();
        ctx.cancel();
        let err = mediator.send(&ctx, Double(1)).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_takes_precedence_over_handler_error() {
        let mediator = quiet().build();
        mediator
            .register_handler(handler_fn(|ctx: Context, _r: Double| async move {
                ctx.cancel();
                Err::<i64, _>(Error::internal("store unavailable"))
            }))
            .unwrap();

        let err = mediator
            .send(&Context::background(), Double(1))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_blocks_dispatch() {
        let mediator = quiet()
            .middleware(GuardMiddleware::new("deny-all", |_ctx, _request| false))
            .build();
        mediator
            .register_handler(handler_fn(|_ctx, r: Double| async move { Ok(r.0) }))
            .unwrap();

        let err = mediator
            .send(&Context::background(), Double(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), keel_core::ErrorKind::MiddlewareBlocked);
    }

    #[tokio::test]
    async fn test_publish_routes_notification() {
        let mediator = quiet().build();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        mediator
            .register_notification_handler(notification_fn(move |_ctx, n: UserCreated| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(n.email);
                    Ok(())
                }
            }))
            .unwrap();

        let event = UserCreated {
            email: "a@example.com".into(),
        };
        mediator.publish(&Context::background(), &event).await.unwrap();
        assert_eq!(*seen.lock(), vec!["a@example.com".to_string()]);
        assert!(mediator.has_notification_handler::<UserCreated>());
    }

    #[tokio::test]
    async fn test_publish_without_handler_and_with_panic() {
        let mediator = quiet().build();
        let event = UserCreated {
            email: "b@example.com".into(),
        };
        let err = mediator
            .publish(&Context::background(), &event)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), keel_core::ErrorKind::HandlerNotFound);

        mediator
            .register_notification_handler(notification_fn(|_ctx, n: UserCreated| async move {
                if n.email.starts_with('b') {
                    panic!("mailer crashed");
                }
                Ok(())
            }))
            .unwrap();
        let err = mediator
            .publish(&Context::background(), &event)
            .await
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_request_still_returns_result() {
        let mediator = quiet()
            .slow_request_threshold(Duration::from_millis(10))
            .build();
        mediator
            .register_handler(handler_fn(|_ctx, r: Double| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(r.0)
            }))
            .unwrap();

        assert_eq!(
            mediator.send(&Context::background(), Double(4)).await.unwrap(),
            4
        );
    }
}
