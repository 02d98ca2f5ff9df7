//! Request and notification handlers.

use crate::request::{BoxedRequest, BoxedResponse, Notification, Request};
use async_trait::async_trait;
use keel_core::{Context, Error, Result};
use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;

/// Handler for one request shape.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync {
    /// Handle the request
    async fn handle(&self, ctx: &Context, request: R) -> Result<R::Response>;
}

/// Handler for one notification shape.
#[async_trait]
pub trait NotificationHandler<N: Notification>: Send + Sync {
    /// Handle the notification
    async fn handle(&self, ctx: &Context, notification: &N) -> Result<()>;
}

/// Type-erased request handler
#[async_trait]
pub(crate) trait DynRequestHandler: Send + Sync {
    async fn handle_dyn(&self, ctx: &Context, request: BoxedRequest) -> Result<BoxedResponse>;
}

/// Wrapper for typed request handlers
pub(crate) struct TypedRequestHandler<R: Request, H: RequestHandler<R>> {
    handler: H,
    _phantom: PhantomData<fn(R)>,
}

impl<R: Request, H: RequestHandler<R>> TypedRequestHandler<R, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Request, H: RequestHandler<R>> DynRequestHandler for TypedRequestHandler<R, H> {
    async fn handle_dyn(&self, ctx: &Context, request: BoxedRequest) -> Result<BoxedResponse> {
        let key = request.request_key();
        match request.into_any().downcast::<R>() {
            Ok(request) => {
                let response = self.handler.handle(ctx, *request).await?;
                Ok(Box::new(response))
            }
            Err(_) => Err(Error::internal(format!("request type mismatch for {}", key))),
        }
    }
}

/// Type-erased notification handler
#[async_trait]
pub(crate) trait DynNotificationHandler: Send + Sync {
    async fn handle_dyn(&self, ctx: &Context, notification: &(dyn Any + Send + Sync))
        -> Result<()>;
}

pub(crate) struct TypedNotificationHandler<N: Notification, H: NotificationHandler<N>> {
    handler: H,
    _phantom: PhantomData<fn(N)>,
}

impl<N: Notification, H: NotificationHandler<N>> TypedNotificationHandler<N, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<N: Notification, H: NotificationHandler<N>> DynNotificationHandler
    for TypedNotificationHandler<N, H>
{
    async fn handle_dyn(
        &self,
        ctx: &Context,
        notification: &(dyn Any + Send + Sync),
    ) -> Result<()> {
        match notification.downcast_ref::<N>() {
            Some(notification) => self.handler.handle(ctx, notification).await,
            None => Err(Error::internal(format!(
                "notification type mismatch for {}",
                N::type_key()
            ))),
        }
    }
}

/// Request handler backed by an async closure. Built with [`handler_fn`].
pub struct FnHandler<R, F> {
    f: F,
    _phantom: PhantomData<fn(R)>,
}

/// Adapt an async closure into a [`RequestHandler`].
///
/// ```rust,ignore
/// mediator.register_handler(handler_fn(|_ctx, cmd: CreateUser| async move {
///     Ok(cmd.email.len())
/// }))?;
/// ```
pub fn handler_fn<R, F, Fut>(f: F) -> FnHandler<R, F>
where
    R: Request,
    F: Fn(Context, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response>> + Send + 'static,
{
    FnHandler {
        f,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<R, F, Fut> RequestHandler<R> for FnHandler<R, F>
where
    R: Request,
    F: Fn(Context, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response>> + Send + 'static,
{
    async fn handle(&self, ctx: &Context, request: R) -> Result<R::Response> {
        (self.f)(ctx.clone(), request).await
    }
}

/// Notification handler backed by an async closure. Built with [`notification_fn`].
pub struct FnNotificationHandler<N, F> {
    f: F,
    _phantom: PhantomData<fn(N)>,
}

/// Adapt an async closure into a [`NotificationHandler`].
///
/// The closure receives a clone of the notification.
pub fn notification_fn<N, F, Fut>(f: F) -> FnNotificationHandler<N, F>
where
    N: Notification + Clone,
    F: Fn(Context, N) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnNotificationHandler {
        f,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<N, F, Fut> NotificationHandler<N> for FnNotificationHandler<N, F>
where
    N: Notification + Clone,
    F: Fn(Context, N) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: &Context, notification: &N) -> Result<()> {
        (self.f)(ctx.clone(), notification.clone()).await
    }
}
