//! Publish-events stage.

use crate::bus::EventBus;
use async_trait::async_trait;
use keel_core::{Context, Result};
use keel_log::Logger;
use keel_mediator::{BoxedRequest, BoxedResponse, Middleware, Next};
use std::sync::{Arc, Weak};

/// Drains the event bus after the rest of the chain returns.
///
/// If a drain is already running (for example when a notification handler
/// dispatches a request), that drain publishes the new events instead.
///
/// The inner result wins when it is an error; a publish error then only
/// reaches the log. When the inner call succeeded, a publish error replaces
/// the result.
///
/// Holds the bus weakly: the bus owns the mediator that owns this stage.
pub struct PublishEventsMiddleware {
    bus: Weak<EventBus>,
    logger: Logger,
}

impl PublishEventsMiddleware {
    pub fn new(bus: &Arc<EventBus>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
            logger: Logger::global(),
        }
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

#[async_trait]
impl Middleware for PublishEventsMiddleware {
    async fn handle(
        &self,
        ctx: &Context,
        request: BoxedRequest,
        next: Next,
    ) -> Result<BoxedResponse> {
        let key = request.request_key();
        let result = next.run(ctx, request).await;

        let Some(bus) = self.bus.upgrade() else {
            keel_log::debug!(logger: self.logger, "Event bus dropped, skipping publish");
            return result;
        };

        match (result, bus.try_publish_domain_events(ctx).await) {
            (result, Ok(_)) => result,
            (Ok(_), Err(publish_err)) => Err(publish_err),
            (Err(err), Err(publish_err)) => {
                keel_log::error!(
                    logger: self.logger,
                    "Publishing events after failed {} also failed: {}",
                    key,
                    publish_err
                );
                Err(err)
            }
        }
    }

    fn adopt_logger(&mut self, logger: &Logger) {
        self.logger = logger.clone();
    }

    fn name(&self) -> &'static str {
        "publish-events"
    }
}
