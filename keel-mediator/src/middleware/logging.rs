//! Request logging stage.

use super::{Middleware, Next};
use crate::request::{BoxedRequest, BoxedResponse};
use async_trait::async_trait;
use keel_core::{Context, Result};
use keel_log::Logger;

/// Records the request key and outcome of every dispatch.
pub struct LoggingMiddleware {
    logger: Logger,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self {
            logger: Logger::global(),
        }
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        ctx: &Context,
        request: BoxedRequest,
        next: Next,
    ) -> Result<BoxedResponse> {
        let key = request.request_key();
        keel_log::debug!(
            logger: self.logger,
            "Handling {} (correlation {})",
            key,
            ctx.correlation_id()
        );

        let result = next.run(ctx, request).await;
        match &result {
            Ok(_) => keel_log::debug!(logger: self.logger, "Handled {}", key),
            Err(err) => keel_log::warn!(
                logger: self.logger,
                "Request {} failed [{}]: {}",
                key,
                err.kind(),
                err
            ),
        }
        result
    }

    fn adopt_logger(&mut self, logger: &Logger) {
        self.logger = logger.clone();
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}
