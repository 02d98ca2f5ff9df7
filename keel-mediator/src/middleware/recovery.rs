//! Panic recovery stage.

use super::{Middleware, Next};
use crate::request::{BoxedRequest, BoxedResponse};
use async_trait::async_trait;
use futures::FutureExt;
use keel_core::{Context, Error, Result, TypeKey};
use keel_log::Logger;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Callback invoked with the request key and panic message.
pub type PanicCallback = Arc<dyn Fn(&TypeKey, &str) + Send + Sync>;

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `fut`, turning a panic into `Internal`.
pub async fn catch_panic<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::internal(format!(
            "panic: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Traps panics from inner stages and the handler.
///
/// Must be the outermost stage; the mediator builder installs it first.
pub struct RecoveryMiddleware {
    on_panic: Option<PanicCallback>,
    logger: Logger,
}

impl RecoveryMiddleware {
    pub fn new() -> Self {
        Self {
            on_panic: None,
            logger: Logger::global(),
        }
    }

    /// Invoke `callback` whenever a panic is trapped.
    pub fn on_panic<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TypeKey, &str) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(callback));
        self
    }

    pub fn with_callback(mut self, callback: Option<PanicCallback>) -> Self {
        self.on_panic = callback;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

impl Default for RecoveryMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for RecoveryMiddleware {
    async fn handle(
        &self,
        ctx: &Context,
        request: BoxedRequest,
        next: Next,
    ) -> Result<BoxedResponse> {
        let key = request.request_key();
        match AssertUnwindSafe(next.run(ctx, request)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                keel_log::error!(
                    logger: self.logger,
                    "Recovered from panic while handling {}: {}",
                    key,
                    message
                );
                if let Some(callback) = &self.on_panic {
                    callback(&key, &message);
                }
                Err(Error::internal(format!("panic: {}", message)))
            }
        }
    }

    fn adopt_logger(&mut self, logger: &Logger) {
        self.logger = logger.clone();
    }

    fn name(&self) -> &'static str {
        "recovery"
    }
}
