//! Domain event definitions

use chrono::{DateTime, Utc};
use keel_core::{EventMessage, Result};
use keel_mediator::{AnyNotification, Notification};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

/// Identity and delivery state carried by every domain event.
///
/// `id` and `created_at` are stamped once when the event is enqueued.
/// `published` only ever moves from `false` to `true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID, assigned at enqueue
    pub id: Option<Uuid>,

    /// Logical topic
    pub topic: String,

    /// Timestamp when the event was enqueued
    pub created_at: Option<DateTime<Utc>>,

    /// Start of the drain that published the event
    pub published_at: Option<DateTime<Utc>>,

    /// Set once in-process handlers have received the event
    pub published: bool,

    /// Also hand the event to the messaging adapter
    pub can_publish_externally: bool,

    /// Optional correlation ID for tracing
    pub correlation_id: Option<Uuid>,
}

impl EventMetadata {
    /// Metadata for an in-process event on `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Metadata for an event that is also published externally.
    pub fn external(topic: impl Into<String>) -> Self {
        Self {
            can_publish_externally: true,
            ..Self::new(topic)
        }
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Assign id and creation time unless already set.
    pub fn stamp(&mut self) {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4());
        }
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
    }

    pub fn is_stamped(&self) -> bool {
        self.id.is_some() && self.created_at.is_some()
    }
}

/// Event raised by business logic and drained by the [`EventBus`](crate::EventBus).
///
/// A domain event is a [`Notification`]: in-process delivery goes to the
/// notification handler registered on the mediator for its type key.
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Serialize)]
/// struct OrderPlaced {
///     #[serde(skip)]
///     meta: EventMetadata,
///     order_id: String,
/// }
///
/// impl Notification for OrderPlaced {}
///
/// impl DomainEvent for OrderPlaced {
///     fn metadata(&self) -> &EventMetadata { &self.meta }
///     fn metadata_mut(&mut self) -> &mut EventMetadata { &mut self.meta }
/// }
/// ```
pub trait DomainEvent: Notification + Serialize + Debug {
    fn metadata(&self) -> &EventMetadata;

    fn metadata_mut(&mut self) -> &mut EventMetadata;

    /// Logical topic
    fn topic(&self) -> &str {
        &self.metadata().topic
    }
}

/// Type-erased event held by the queue.
pub(crate) trait QueuedEvent: Send + Sync {
    fn metadata(&self) -> &EventMetadata;

    fn metadata_mut(&mut self) -> &mut EventMetadata;

    fn as_notification(&self) -> &dyn AnyNotification;

    /// Envelope handed to the messaging adapter.
    fn to_message(&self) -> Result<EventMessage>;

    fn describe(&self) -> String;
}

impl<E: DomainEvent> QueuedEvent for E {
    fn metadata(&self) -> &EventMetadata {
        DomainEvent::metadata(self)
    }

    fn metadata_mut(&mut self) -> &mut EventMetadata {
        DomainEvent::metadata_mut(self)
    }

    fn as_notification(&self) -> &dyn AnyNotification {
        self
    }

    fn to_message(&self) -> Result<EventMessage> {
        let meta = DomainEvent::metadata(self);
        Ok(EventMessage {
            id: meta.id.unwrap_or_default(),
            topic: meta.topic.clone(),
            created_at: meta.created_at.unwrap_or_else(Utc::now),
            published_at: meta.published_at,
            payload: serde_json::to_value(self)?,
        })
    }

    fn describe(&self) -> String {
        format!("{:?}", self)
    }
}
