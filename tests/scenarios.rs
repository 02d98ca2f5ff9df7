//! End-to-end scenarios through the `Keel` composition root.
//!
//! Each test wires the real mediator, event bus and state service over the
//! in-memory doubles from `keel-testing`.

use keel::prelude::*;
use keel::{CacheConfig, ValidationMiddleware};
use keel_testing::{InMemoryStateAdapter, RecordingMessagingAdapter, assert_error_kind};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug)]
struct Cmd {
    x: i64,
}

impl Request for Cmd {
    type Response = i64;

    fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        if self.x < 0 {
            return Err(vec![ValidationError::new("x", "must not be negative")]);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct Audited {
    #[serde(skip)]
    meta: EventMetadata,
    seq: u32,
}

impl Notification for Audited {}

impl DomainEvent for Audited {
    fn metadata(&self) -> &EventMetadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut EventMetadata {
        &mut self.meta
    }
}

struct Harness {
    keel: Keel,
    state: Arc<InMemoryStateAdapter>,
    messaging: Arc<RecordingMessagingAdapter>,
}

fn harness(configure: impl FnOnce(KeelBuilder) -> KeelBuilder) -> Harness {
    let state = Arc::new(InMemoryStateAdapter::new());
    let messaging = Arc::new(RecordingMessagingAdapter::new());
    let builder = Keel::builder()
        .logger(Logger::null())
        .state_adapter(state.clone())
        .messaging_adapter(messaging.clone());
    let keel = configure(builder).build().unwrap();

    Harness {
        keel,
        state,
        messaging,
    }
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_dispatch_happy_path() {
    let h = harness(|b| b);
    h.keel
        .mediator()
        .register_handler(handler_fn(|_ctx, cmd: Cmd| async move { Ok(cmd.x) }))
        .unwrap();

    let value = h.keel.send(&Context::background(), Cmd { x: 42 }).await.unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_handler_missing() {
    let h = harness(|b| b);

    let result = h.keel.send(&Context::background(), Cmd { x: 1 }).await;
    assert_error_kind(&result, ErrorKind::HandlerNotFound);
}

#[tokio::test]
async fn test_validation_short_circuits_before_handler() {
    let h = harness(|b| b.middleware(ValidationMiddleware::new().logger(Logger::null())));
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    h.keel
        .mediator()
        .register_handler(handler_fn(move |_ctx, cmd: Cmd| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(cmd.x) }
        }))
        .unwrap();

    let result = h.keel.send(&Context::background(), Cmd { x: -1 }).await;
    assert_error_kind(&result, ErrorKind::BadRequest);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    assert_eq!(h.keel.send(&Context::background(), Cmd { x: 3 }).await.unwrap(), 3);
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_event_drain_order() {
    let h = harness(|b| b);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = seen.clone();
    let messaging = h.messaging.clone();
    h.keel
        .mediator()
        .register_notification_handler(notification_fn(move |_ctx, event: Audited| {
            // external copies of earlier events are already out
            log.lock().push((event.meta.topic.clone(), messaging.published().len()));
            async move { Ok(()) }
        }))
        .unwrap();

    for (seq, topic) in ["e1", "e2", "e3"].into_iter().enumerate() {
        h.keel.events().add_domain_event(Audited {
            meta: EventMetadata::external(topic),
            seq: seq as u32,
        });
    }
    h.keel
        .events()
        .publish_domain_events(&Context::background())
        .await
        .unwrap();

    assert_eq!(
        *seen.lock(),
        vec![("e1".to_string(), 0), ("e2".to_string(), 1), ("e3".to_string(), 2)]
    );
    assert_eq!(h.messaging.published_topics(), vec!["e1", "e2", "e3"]);
    assert!(h.keel.events().is_empty());
}

#[tokio::test]
async fn test_events_queued_by_handler_publish_after_send() {
    let h = harness(|b| b);
    let events = Arc::downgrade(h.keel.events());
    h.keel
        .mediator()
        .register_handler(handler_fn(move |_ctx, cmd: Cmd| {
            if let Some(bus) = events.upgrade() {
                bus.add_domain_event(Audited {
                    meta: EventMetadata::new("cmd.handled"),
                    seq: cmd.x as u32,
                });
            }
            async move { Ok(cmd.x) }
        }))
        .unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    h.keel
        .mediator()
        .register_notification_handler(notification_fn(move |_ctx, _event: Audited| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(()) }
        }))
        .unwrap();

    h.keel.send(&Context::background(), Cmd { x: 5 }).await.unwrap();

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert!(h.keel.events().is_empty());
    assert!(h.messaging.published().is_empty());
}

// =============================================================================
// State
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_state_breaker_trips_then_recovers() {
    let h = harness(|b| {
        b.state_config(
            StateServiceConfig::new().breaker(
                CircuitBreakerConfig::new("state")
                    .failure_count_threshold(3)
                    .max_requests_in_half_open(1)
                    .break_duration(Duration::from_secs(10)),
            ),
        )
    });
    let ctx = Context::background();
    h.state.fail_with(Error::internal("connection refused"));

    for _ in 0..3 {
        let result = h.keel.state().has(&ctx, "k").await;
        assert_error_kind(&result, ErrorKind::Internal);
    }
    let result = h.keel.state().has(&ctx, "k").await;
    assert_error_kind(&result, ErrorKind::CircuitOpen);
    assert_eq!(h.state.calls().method_call_count("has"), 3);

    h.state.clear_failure();
    tokio::time::advance(Duration::from_secs(10)).await;

    assert!(!h.keel.state().has(&ctx, "k").await.unwrap());
    assert_eq!(h.state.calls().method_call_count("has"), 4);
    assert_eq!(
        h.keel.state().breaker().state(),
        keel::resilience::CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_survives_cache_expiry() {
    let h = harness(|b| {
        b.state_config(
            StateServiceConfig::new()
                .cache(CacheConfig::new().item_expiration(Duration::from_secs(5))),
        )
    });
    let ctx = Context::background();

    h.keel.state().set(&ctx, "greeting", "hello").await.unwrap();
    tokio::time::advance(Duration::from_secs(6)).await;

    let value: Option<String> = h.keel.state().get(&ctx, "greeting").await.unwrap();
    assert_eq!(value.as_deref(), Some("hello"));
    assert_eq!(h.state.calls().method_call_count("get"), 1);

    h.keel.state().delete(&ctx, "greeting").await.unwrap();
    h.keel.state().delete(&ctx, "greeting").await.unwrap();
    assert!(!h.keel.state().has(&ctx, "greeting").await.unwrap());
    h.keel.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_under_concurrency() {
    const WRITERS: usize = 10_000;

    let h = harness(|b| b.state_config(StateServiceConfig::new().cache(CacheConfig::new())));
    let state = h.keel.state().clone();

    let writes = (0..WRITERS).map(|i| {
        let state = state.clone();
        tokio::spawn(async move { state.set(&Context::background(), "k", &i).await })
    });
    for result in futures::future::join_all(writes).await {
        result.unwrap().unwrap();
    }

    let reads = (0..WRITERS).map(|_| {
        let state = state.clone();
        tokio::spawn(async move {
            let mut dest = usize::MAX;
            let found = state
                .get_into(&Context::background(), "k", &mut dest)
                .await?;
            Ok::<_, Error>((found, dest))
        })
    });
    for result in futures::future::join_all(reads).await {
        let (found, dest) = result.unwrap().unwrap();
        assert!(found);
        assert!(dest < WRITERS);
    }

    let cache = state.cache().unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.contains_key("k"));
    h.keel.shutdown().await;
}
