//! Event Bus implementation

use crate::event::{DomainEvent, QueuedEvent};
use chrono::{DateTime, Utc};
use keel_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
use keel_core::{Context, ErrorKind, MessageHandler, MessagingAdapter, Result};
use keel_log::Logger;
use keel_mediator::Mediator;
use keel_mediator::middleware::catch_panic;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Breaker wrapping each drain. Logs through `logger`.
    pub breaker: CircuitBreakerConfig,

    /// Treat a missing notification handler as delivered
    pub ignore_missing_handlers: bool,

    /// Logging collaborator
    pub logger: Logger,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::new("events"),
            ignore_missing_handlers: false,
            logger: Logger::global(),
        }
    }
}

impl EventBusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn ignore_missing_handlers(mut self, ignore: bool) -> Self {
        self.ignore_missing_handlers = ignore;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

/// Queue of pending domain events and the drain that publishes them.
///
/// Events are published in enqueue order, first to the in-process
/// notification handler through the [`Mediator`], then to the messaging
/// adapter when the event opts in. Drains are serialized; enqueueing never
/// waits for a drain.
pub struct EventBus {
    mediator: Arc<Mediator>,
    messaging: Option<Arc<dyn MessagingAdapter>>,
    breaker: Arc<CircuitBreaker>,
    queue: Queue,
    drain_lock: tokio::sync::Mutex<()>,
    ignore_missing_handlers: bool,
    logger: Logger,
}

impl EventBus {
    /// Bus publishing in-process only.
    pub fn new(mediator: Arc<Mediator>) -> Self {
        Self::with_config(mediator, None, EventBusConfig::default())
    }

    pub fn with_config(
        mediator: Arc<Mediator>,
        messaging: Option<Arc<dyn MessagingAdapter>>,
        config: EventBusConfig,
    ) -> Self {
        Self {
            mediator,
            messaging,
            breaker: CircuitBreaker::new(config.breaker.clone().logger(config.logger.clone())),
            queue: Mutex::new(VecDeque::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            ignore_missing_handlers: config.ignore_missing_handlers,
            logger: config.logger,
        }
    }

    pub fn builder(mediator: Arc<Mediator>) -> EventBusBuilder {
        EventBusBuilder::new(mediator)
    }

    /// Breaker guarding drains.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    /// Stamp `event` and append it to the queue. Returns the event id.
    pub fn add_domain_event<E: DomainEvent>(&self, mut event: E) -> Uuid {
        let meta = event.metadata_mut();
        meta.stamp();
        let id = meta.id.unwrap_or_default();

        keel_log::trace!(logger: self.logger, "Queued event {} on '{}'", id, meta.topic);
        self.queue.lock().push_back(Box::new(event));
        id
    }

    /// Number of events waiting to be published.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Publish queued events in order.
    ///
    /// Stops at the first failure and returns it. The failed event and all
    /// later ones stay queued for the next drain. An event whose in-process
    /// delivery succeeded is not redelivered in-process on retry.
    pub async fn publish_domain_events(&self, ctx: &Context) -> Result<()> {
        let _drain = ctx.run(async { Ok(self.drain_lock.lock().await) }).await?;
        self.drain_locked(ctx).await
    }

    /// Like [`publish_domain_events`](Self::publish_domain_events), but
    /// returns `Ok(false)` at once if another drain is in flight.
    ///
    /// The running drain publishes everything queued before it finds the
    /// queue empty, so events added now are not left behind. Handlers that
    /// dispatch requests while a drain is running rely on this to avoid
    /// waiting on themselves.
    pub async fn try_publish_domain_events(&self, ctx: &Context) -> Result<bool> {
        let Ok(_drain) = self.drain_lock.try_lock() else {
            keel_log::trace!(logger: self.logger, "Drain already in flight");
            return Ok(false);
        };
        self.drain_locked(ctx).await.map(|()| true)
    }

    async fn drain_locked(&self, ctx: &Context) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let started = Utc::now();
        self.breaker.execute(|| self.drain(ctx, started)).await
    }

    async fn drain(&self, ctx: &Context, started: DateTime<Utc>) -> Result<()> {
        let mut published = 0usize;
        loop {
            ctx.check()?;
            let next = self.queue.lock().pop_front();
            let mut head = Head {
                queue: &self.queue,
                event: next,
            };
            let Some(event) = head.event.as_deref_mut() else {
                keel_log::debug!(logger: self.logger, "Drained {} domain events", published);
                return Ok(());
            };

            if let Err(err) = self.publish_one(ctx, event, started).await {
                keel_log::warn!(
                    logger: self.logger,
                    "Publishing {} failed after {} events: {}",
                    event.describe(),
                    published,
                    err
                );
                return Err(err);
            }
            head.delivered();
            published += 1;
        }
    }

    async fn publish_one(
        &self,
        ctx: &Context,
        event: &mut dyn QueuedEvent,
        started: DateTime<Utc>,
    ) -> Result<()> {
        event.metadata_mut().published_at = Some(started);

        if !event.metadata().published {
            match self.mediator.publish_dyn(ctx, event.as_notification()).await {
                Ok(()) => {}
                Err(err)
                    if err.kind() == ErrorKind::HandlerNotFound && self.ignore_missing_handlers =>
                {
                    keel_log::debug!(
                        logger: self.logger,
                        "No handler for event on '{}'",
                        event.metadata().topic
                    );
                }
                Err(err) => return Err(err),
            }
            event.metadata_mut().published = true;
        }

        if event.metadata().can_publish_externally {
            match &self.messaging {
                Some(messaging) => {
                    let message = event.to_message()?;
                    catch_panic(ctx.run(messaging.publish(ctx, &message))).await?;
                }
                None => keel_log::debug!(
                    logger: self.logger,
                    "No messaging adapter, '{}' stays in-process",
                    event.metadata().topic
                ),
            }
        }
        Ok(())
    }

    /// Subscribe to `topic` on the messaging adapter.
    pub async fn subscribe(&self, ctx: &Context, topic: &str, handler: MessageHandler) -> Result<()> {
        let messaging = self.require_messaging()?;
        self.breaker
            .execute(|| ctx.run(messaging.subscribe(ctx, topic, handler)))
            .await
    }

    /// Unsubscribe from `topic` on the messaging adapter.
    pub async fn unsubscribe(&self, ctx: &Context, topic: &str) -> Result<()> {
        let messaging = self.require_messaging()?;
        self.breaker
            .execute(|| ctx.run(messaging.unsubscribe(ctx, topic)))
            .await
    }

    fn require_messaging(&self) -> Result<&Arc<dyn MessagingAdapter>> {
        self.messaging
            .as_ref()
            .ok_or_else(|| keel_core::Error::internal("no messaging adapter configured"))
    }
}

type Queue = Mutex<VecDeque<Box<dyn QueuedEvent>>>;

/// The event being published. It returns to the head of the queue when
/// dropped undelivered, whether publishing failed or the drain itself was
/// dropped mid-await, keeping the metadata written so far.
struct Head<'a> {
    queue: &'a Queue,
    event: Option<Box<dyn QueuedEvent>>,
}

impl Head<'_> {
    fn delivered(&mut self) {
        self.event = None;
    }
}

impl Drop for Head<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.queue.lock().push_front(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("pending", &self.pending())
            .field("external", &self.messaging.is_some())
            .field("breaker", &self.breaker)
            .finish()
    }
}

/// Builder for [`EventBus`]
pub struct EventBusBuilder {
    mediator: Arc<Mediator>,
    messaging: Option<Arc<dyn MessagingAdapter>>,
    config: EventBusConfig,
}

impl EventBusBuilder {
    pub fn new(mediator: Arc<Mediator>) -> Self {
        Self {
            mediator,
            messaging: None,
            config: EventBusConfig::default(),
        }
    }

    pub fn messaging(mut self, adapter: Arc<dyn MessagingAdapter>) -> Self {
        self.messaging = Some(adapter);
        self
    }

    pub fn config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ignore_missing_handlers(mut self, ignore: bool) -> Self {
        self.config.ignore_missing_handlers = ignore;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.config.logger = logger;
        self
    }

    pub fn build(self) -> Arc<EventBus> {
        Arc::new(EventBus::with_config(self.mediator, self.messaging, self.config))
    }
}
