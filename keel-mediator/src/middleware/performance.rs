//! Request timing stage.

use super::{Middleware, Next};
use crate::request::{BoxedRequest, BoxedResponse};
use async_trait::async_trait;
use keel_core::{Context, Result};
use keel_log::Logger;
use std::time::Duration;
use tokio::time::Instant;

/// Warns when a request takes longer than the threshold.
pub struct PerformanceMiddleware {
    threshold: Duration,
    logger: Logger,
}

impl PerformanceMiddleware {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            logger: Logger::global(),
        }
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Default for PerformanceMiddleware {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl Middleware for PerformanceMiddleware {
    async fn handle(
        &self,
        ctx: &Context,
        request: BoxedRequest,
        next: Next,
    ) -> Result<BoxedResponse> {
        let key = request.request_key();
        let start = Instant::now();
        let result = next.run(ctx, request).await;
        let elapsed = start.elapsed();

        if elapsed > self.threshold {
            keel_log::warn!(
                logger: self.logger,
                "Slow request {}: {:?} (threshold {:?})",
                key,
                elapsed,
                self.threshold
            );
        } else {
            keel_log::trace!(logger: self.logger, "Request {} took {:?}", key, elapsed);
        }
        result
    }

    fn adopt_logger(&mut self, logger: &Logger) {
        self.logger = logger.clone();
    }

    fn name(&self) -> &'static str {
        "performance"
    }
}
