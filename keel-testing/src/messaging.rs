// Recording messaging adapter for tests

use crate::mock::CallRecorder;
use async_trait::async_trait;
use keel_core::{Context, Error, EventMessage, MessageHandler, MessagingAdapter, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// [`MessagingAdapter`] that records published messages.
///
/// Messages published on a topic with a local subscriber are also delivered
/// to that subscriber before `publish` returns.
#[derive(Default)]
pub struct RecordingMessagingAdapter {
    published: Mutex<Vec<EventMessage>>,
    subscribers: Mutex<HashMap<String, MessageHandler>>,
    failure: Mutex<Option<(Option<u32>, Error)>>,
    calls: CallRecorder,
}

impl RecordingMessagingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages accepted so far, in publish order.
    pub fn published(&self) -> Vec<EventMessage> {
        self.published.lock().clone()
    }

    /// Topics of accepted messages, in publish order.
    pub fn published_topics(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|message| message.topic.clone())
            .collect()
    }

    pub fn calls(&self) -> &CallRecorder {
        &self.calls
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribers.lock().contains_key(topic)
    }

    /// Fail every publish until [`clear_failure`](Self::clear_failure).
    pub fn fail_with(&self, error: Error) {
        *self.failure.lock() = Some((None, error));
    }

    /// Fail the next `times` publishes.
    pub fn fail_times(&self, times: u32, error: Error) {
        *self.failure.lock() = Some((Some(times), error));
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    fn injected_failure(&self) -> Option<Error> {
        let mut failure = self.failure.lock();
        match failure.take() {
            None => None,
            Some((None, err)) => {
                *failure = Some((None, err.clone()));
                Some(err)
            }
            Some((Some(remaining), err)) => {
                if remaining > 1 {
                    *failure = Some((Some(remaining - 1), err.clone()));
                }
                Some(err)
            }
        }
    }
}

#[async_trait]
impl MessagingAdapter for RecordingMessagingAdapter {
    async fn publish(&self, _ctx: &Context, message: &EventMessage) -> Result<()> {
        self.calls
            .record("publish", vec![message.topic.clone(), message.id.to_string()]);
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        self.published.lock().push(message.clone());
        let subscriber = self.subscribers.lock().get(&message.topic).cloned();
        match subscriber {
            Some(handler) => handler(message.clone()).await,
            None => Ok(()),
        }
    }

    async fn subscribe(&self, _ctx: &Context, topic: &str, handler: MessageHandler) -> Result<()> {
        self.calls.record("subscribe", vec![topic.to_string()]);
        self.subscribers.lock().insert(topic.to_string(), handler);
        Ok(())
    }

    async fn unsubscribe(&self, _ctx: &Context, topic: &str) -> Result<()> {
        self.calls.record("unsubscribe", vec![topic.to_string()]);
        self.subscribers.lock().remove(topic);
        Ok(())
    }
}

impl std::fmt::Debug for RecordingMessagingAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingMessagingAdapter")
            .field("published", &self.published.lock().len())
            .field("calls", &self.calls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn message(topic: &str) -> EventMessage {
        EventMessage {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            created_at: Utc::now(),
            published_at: None,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_publish_records_and_delivers_to_subscriber() {
        let adapter = RecordingMessagingAdapter::new();
        let ctx = Context::background();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let handler: MessageHandler =
            Arc::new(move |_message: EventMessage| -> BoxFuture<'static, Result<()>> {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }.boxed()
            });

        adapter.subscribe(&ctx, "orders", handler).await.unwrap();
        adapter.publish(&ctx, &message("orders")).await.unwrap();
        adapter.publish(&ctx, &message("users")).await.unwrap();

        assert_eq!(adapter.published_topics(), vec!["orders", "users"]);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        adapter.unsubscribe(&ctx, "orders").await.unwrap();
        assert!(!adapter.is_subscribed("orders"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_recorded() {
        let adapter = RecordingMessagingAdapter::new();
        adapter.fail_times(1, Error::internal("broker down"));
        let ctx = Context::background();

        assert!(adapter.publish(&ctx, &message("a")).await.is_err());
        adapter.publish(&ctx, &message("a")).await.unwrap();
        assert_eq!(adapter.published().len(), 1);
        assert_eq!(adapter.calls().method_call_count("publish"), 2);
    }
}
