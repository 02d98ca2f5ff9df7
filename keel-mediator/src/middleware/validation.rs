//! Validation stage.

use super::{Middleware, Next};
use crate::request::{BoxedRequest, BoxedResponse};
use async_trait::async_trait;
use keel_core::{Context, Error, Result};
use keel_log::Logger;

/// Short-circuits with `BadRequest` when [`Request::validate`](crate::Request::validate)
/// reports errors. The handler is not invoked.
pub struct ValidationMiddleware {
    logger: Logger,
}

impl ValidationMiddleware {
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

impl Default for ValidationMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    async fn handle(
        &self,
        ctx: &Context,
        request: BoxedRequest,
        next: Next,
    ) -> Result<BoxedResponse> {
        if let Err(errors) = request.validate_dyn() {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            keel_log::debug!(
                logger: self.logger,
                "Validation failed for {}: {}",
                request.request_key(),
                message
            );
            return Err(Error::BadRequest(message));
        }
        next.run(ctx, request).await
    }

    fn adopt_logger(&mut self, logger: &Logger) {
        self.logger = logger.clone();
    }

    fn name(&self) -> &'static str {
        "validation"
    }
}
