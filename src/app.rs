//! The `Keel` composition root.

use keel_core::{Context, Error, MessagingAdapter, Result, StateAdapter};
use keel_events::{EventBus, EventBusConfig, PublishEventsMiddleware};
use keel_log::Logger;
use keel_mediator::{Mediator, MediatorConfig, Middleware, Request};
use keel_state::{StateService, StateServiceConfig};
use std::sync::Arc;

/// The wired application services.
///
/// Built once at startup with [`Keel::builder`] and handed to the code that
/// needs it. The mediator's chain runs the recovery stage first, then the
/// publish-events stage, then any stages added on the builder.
///
/// ```rust,ignore
/// let keel = Keel::builder()
///     .state_adapter(redis)
///     .messaging_adapter(nats)
///     .middleware(ValidationMiddleware::new())
///     .build()?;
///
/// keel.mediator().register_handler::<CreateUser, _>(CreateUserHandler::new(keel.events().clone()))?;
/// let id = keel.send(&Context::background(), CreateUser { email }).await?;
///
/// keel.shutdown().await;
/// ```
pub struct Keel {
    mediator: Arc<Mediator>,
    events: Arc<EventBus>,
    state: Arc<StateService>,
    logger: Logger,
}

impl Keel {
    pub fn builder() -> KeelBuilder {
        KeelBuilder::new()
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn state(&self) -> &Arc<StateService> {
        &self.state
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Shorthand for [`Mediator::send`].
    pub async fn send<R: Request>(&self, ctx: &Context, request: R) -> Result<R::Response> {
        self.mediator.send(ctx, request).await
    }

    /// Stop background work. Queued batch writes are flushed.
    pub async fn shutdown(&self) {
        self.state.shutdown().await;
        let pending = self.events.pending();
        if pending > 0 {
            keel_log::warn!(
                logger: self.logger,
                "Shutting down with {} unpublished domain events",
                pending
            );
        }
        keel_log::info!(logger: self.logger, "Keel stopped");
    }
}

impl std::fmt::Debug for Keel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keel")
            .field("mediator", &self.mediator)
            .field("pending_events", &self.events.pending())
            .field("state", &self.state)
            .finish()
    }
}

/// Builder for [`Keel`].
///
/// A state adapter is required. Without a messaging adapter, events are
/// published in-process only. A logger set here replaces the loggers of all
/// component configs.
pub struct KeelBuilder {
    logger: Option<Logger>,
    state_adapter: Option<Arc<dyn StateAdapter>>,
    messaging_adapter: Option<Arc<dyn MessagingAdapter>>,
    mediator: MediatorConfig,
    events: EventBusConfig,
    state: StateServiceConfig,
    recovery: bool,
    middleware: Vec<Box<dyn Middleware>>,
}

impl KeelBuilder {
    pub fn new() -> Self {
        Self {
            logger: None,
            state_adapter: None,
            messaging_adapter: None,
            mediator: MediatorConfig::default(),
            events: EventBusConfig::default(),
            state: StateServiceConfig::default(),
            recovery: true,
            middleware: Vec::new(),
        }
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn state_adapter(mut self, adapter: Arc<dyn StateAdapter>) -> Self {
        self.state_adapter = Some(adapter);
        self
    }

    pub fn messaging_adapter(mut self, adapter: Arc<dyn MessagingAdapter>) -> Self {
        self.messaging_adapter = Some(adapter);
        self
    }

    pub fn mediator_config(mut self, config: MediatorConfig) -> Self {
        self.mediator = config;
        self
    }

    pub fn event_bus_config(mut self, config: EventBusConfig) -> Self {
        self.events = config;
        self
    }

    pub fn state_config(mut self, config: StateServiceConfig) -> Self {
        self.state = config;
        self
    }

    /// Skip the panic recovery stage.
    pub fn without_recovery(mut self) -> Self {
        self.recovery = false;
        self
    }

    /// Append a stage after the built-in ones. When a logger is set on
    /// this builder, the stage logs through it.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    /// Wire everything up. Spawns the cache tasks when caching is
    /// configured, so this must run inside a Tokio runtime.
    pub fn build(self) -> Result<Keel> {
        let state_adapter = self
            .state_adapter
            .ok_or_else(|| Error::internal("no state adapter configured"))?;

        let (mediator_config, events_config, state_config) = match &self.logger {
            Some(logger) => (
                self.mediator.logger(logger.clone()),
                self.events.logger(logger.clone()),
                self.state.logger(logger.clone()),
            ),
            None => (self.mediator, self.events, self.state),
        };
        let shared_logger = self.logger.is_some();
        let logger = self
            .logger
            .unwrap_or_else(|| mediator_config.logger.clone());

        let mut mediator = Mediator::builder().config(mediator_config);
        if !self.recovery {
            mediator = mediator.without_recovery();
        }
        let mediator = Arc::new(mediator.build());

        let mut events = EventBus::builder(mediator.clone()).config(events_config);
        if let Some(messaging) = self.messaging_adapter {
            events = events.messaging(messaging);
        }
        let events = events.build();

        mediator.register_middleware(PublishEventsMiddleware::new(&events).logger(logger.clone()));
        for mut middleware in self.middleware {
            if shared_logger {
                middleware.adopt_logger(&logger);
            }
            mediator.register_middleware_arc(Arc::from(middleware));
        }

        let state = Arc::new(StateService::new(state_adapter, state_config));

        keel_log::debug!(
            logger: logger,
            "Keel built with {} middleware stages",
            mediator.middleware_count()
        );

        Ok(Keel {
            mediator,
            events,
            state,
            logger,
        })
    }
}

impl Default for KeelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_testing::{CapturingLogSink, InMemoryStateAdapter};

    #[tokio::test]
    async fn test_build_requires_state_adapter() {
        let err = Keel::builder().logger(Logger::null()).build().unwrap_err();
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn test_default_chain_has_recovery_and_publish_stages() {
        let keel = Keel::builder()
            .logger(Logger::null())
            .state_adapter(Arc::new(InMemoryStateAdapter::new()))
            .build()
            .unwrap();
        assert_eq!(keel.mediator().middleware_count(), 2);

        let keel = Keel::builder()
            .logger(Logger::null())
            .state_adapter(Arc::new(InMemoryStateAdapter::new()))
            .without_recovery()
            .middleware(keel_mediator::ValidationMiddleware::new())
            .build()
            .unwrap();
        assert_eq!(keel.mediator().middleware_count(), 2);
    }

    struct Reserve;

    impl keel_mediator::Request for Reserve {
        type Response = ();
    }

    #[tokio::test]
    async fn test_added_stages_log_through_shared_logger() {
        let sink = CapturingLogSink::new();
        let keel = Keel::builder()
            .middleware(keel_mediator::LoggingMiddleware::new())
            .logger(CapturingLogSink::logger(&sink))
            .state_adapter(Arc::new(InMemoryStateAdapter::new()))
            .build()
            .unwrap();
        keel.mediator()
            .register_handler(keel_mediator::handler_fn(|_ctx, _req: Reserve| async {
                Err::<(), _>(Error::Conflict("sold out".into()))
            }))
            .unwrap();

        let err = keel.send(&Context::background(), Reserve).await.unwrap_err();
        assert_eq!(err.kind(), keel_core::ErrorKind::Conflict);
        assert!(sink.contains("failed [conflict]"));
    }

    #[tokio::test]
    async fn test_shutdown_logs_through_shared_logger() {
        let sink = CapturingLogSink::new();
        let keel = Keel::builder()
            .logger(CapturingLogSink::logger(&sink))
            .state_adapter(Arc::new(InMemoryStateAdapter::new()))
            .build()
            .unwrap();

        keel.shutdown().await;
        assert!(sink.contains("Keel stopped"));
    }
}
