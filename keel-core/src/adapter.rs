//! Ports implemented by external storage and messaging adapters.
//!
//! Keel ships no concrete adapters; these traits are what the state service
//! and the event bus consume.

use crate::context::Context;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Opaque stored value.
pub type Value = serde_json::Value;

/// One entry of a batch write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Key/value store backing the state service.
#[async_trait]
pub trait StateAdapter: Send + Sync {
    /// Check whether `key` exists.
    async fn has(&self, ctx: &Context, key: &str) -> Result<bool>;

    /// Read `key`.
    ///
    /// A missing key is reported as [`Error::NotFound`](crate::Error::NotFound),
    /// distinct from transport errors.
    async fn get(&self, ctx: &Context, key: &str) -> Result<Value>;

    /// Write `key`.
    async fn set(&self, ctx: &Context, key: &str, value: Value) -> Result<()>;

    /// Remove `key`.
    async fn delete(&self, ctx: &Context, key: &str) -> Result<()>;

    /// Write many entries in one call.
    async fn batch_set(&self, ctx: &Context, items: Vec<KeyValue>) -> Result<()>;
}

/// Domain event as handed to an external messaging adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique event id
    pub id: Uuid,
    /// Logical topic
    pub topic: String,
    /// Time the event was enqueued
    pub created_at: DateTime<Utc>,
    /// Time the drain that published it started
    pub published_at: Option<DateTime<Utc>>,
    /// Serialized event body
    pub payload: Value,
}

/// Callback invoked for messages received on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(EventMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// External pub/sub transport.
///
/// Delivery is at-least-once; keel does not rely on ordering.
#[async_trait]
pub trait MessagingAdapter: Send + Sync {
    /// Publish one event.
    async fn publish(&self, ctx: &Context, message: &EventMessage) -> Result<()>;

    /// Deliver messages on `topic` to `handler`.
    async fn subscribe(&self, ctx: &Context, topic: &str, handler: MessageHandler) -> Result<()>;

    /// Stop delivering messages on `topic`.
    async fn unsubscribe(&self, ctx: &Context, topic: &str) -> Result<()>;
}
