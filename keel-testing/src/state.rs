// In-memory state adapter for tests

use crate::mock::CallRecorder;
use async_trait::async_trait;
use keel_core::{Context, Error, KeyValue, Result, StateAdapter, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

enum Failure {
    Always(Error),
    Times(u32, Error),
}

/// [`StateAdapter`] backed by a `HashMap`, with call recording, latency and
/// failure injection.
///
/// `get` and `delete` of a missing key fail with `NotFound`, like a strict
/// store would.
///
/// ```rust,ignore
/// let adapter = Arc::new(InMemoryStateAdapter::new());
/// adapter.fail_times(3, Error::internal("connection refused"));
/// let service = StateService::new(adapter.clone(), StateServiceConfig::default());
/// ```
#[derive(Default)]
pub struct InMemoryStateAdapter {
    data: Mutex<HashMap<String, Value>>,
    batches: Mutex<Vec<Vec<KeyValue>>>,
    failure: Mutex<Option<Failure>>,
    latency: Mutex<Option<Duration>>,
    calls: CallRecorder,
}

impl InMemoryStateAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without recording a call.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.data.lock().insert(key.into(), value);
    }

    /// Stored value, without recording a call.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Recorded calls. Method names are `has`, `get`, `set`, `delete`, `batch_set`.
    pub fn calls(&self) -> &CallRecorder {
        &self.calls
    }

    /// Batches received by `batch_set`, in order.
    pub fn batches(&self) -> Vec<Vec<KeyValue>> {
        self.batches.lock().clone()
    }

    /// Fail every call with `error` until [`clear_failure`](Self::clear_failure).
    pub fn fail_with(&self, error: Error) {
        *self.failure.lock() = Some(Failure::Always(error));
    }

    /// Fail the next `times` calls with `error`.
    pub fn fail_times(&self, times: u32, error: Error) {
        *self.failure.lock() = Some(Failure::Times(times, error));
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    async fn enter(&self, method: &str, args: Vec<String>) -> Result<()> {
        self.calls.record(method, args);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut failure = self.failure.lock();
        match failure.take() {
            None => Ok(()),
            Some(Failure::Always(err)) => {
                *failure = Some(Failure::Always(err.clone()));
                Err(err)
            }
            Some(Failure::Times(remaining, err)) => {
                if remaining > 1 {
                    *failure = Some(Failure::Times(remaining - 1, err.clone()));
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl StateAdapter for InMemoryStateAdapter {
    async fn has(&self, _ctx: &Context, key: &str) -> Result<bool> {
        self.enter("has", vec![key.to_string()]).await?;
        Ok(self.data.lock().contains_key(key))
    }

    async fn get(&self, _ctx: &Context, key: &str) -> Result<Value> {
        self.enter("get", vec![key.to_string()]).await?;
        self.data
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn set(&self, _ctx: &Context, key: &str, value: Value) -> Result<()> {
        self.enter("set", vec![key.to_string()]).await?;
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, _ctx: &Context, key: &str) -> Result<()> {
        self.enter("delete", vec![key.to_string()]).await?;
        match self.data.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn batch_set(&self, _ctx: &Context, items: Vec<KeyValue>) -> Result<()> {
        let keys = items.iter().map(|item| item.key.clone()).collect();
        self.enter("batch_set", keys).await?;
        {
            let mut data = self.data.lock();
            for item in &items {
                data.insert(item.key.clone(), item.value.clone());
            }
        }
        self.batches.lock().push(items);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryStateAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStateAdapter")
            .field("len", &self.len())
            .field("calls", &self.calls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_and_missing_keys() {
        let adapter = InMemoryStateAdapter::new();
        let ctx = Context::background();

        adapter.set(&ctx, "k", json!(1)).await.unwrap();
        assert!(adapter.has(&ctx, "k").await.unwrap());
        assert_eq!(adapter.get(&ctx, "k").await.unwrap(), json!(1));

        adapter.delete(&ctx, "k").await.unwrap();
        assert!(adapter.get(&ctx, "k").await.unwrap_err().is_not_found());
        assert!(adapter.delete(&ctx, "k").await.unwrap_err().is_not_found());
        assert_eq!(adapter.calls().method_call_count("get"), 2);
    }

    #[tokio::test]
    async fn test_fail_times_then_recovers() {
        let adapter = InMemoryStateAdapter::new();
        let ctx = Context::background();
        adapter.fail_times(2, Error::internal("down"));

        assert!(adapter.has(&ctx, "k").await.is_err());
        assert!(adapter.has(&ctx, "k").await.is_err());
        assert!(!adapter.has(&ctx, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_set_records_batches() {
        let adapter = InMemoryStateAdapter::new();
        let ctx = Context::background();
        adapter
            .batch_set(&ctx, vec![KeyValue::new("a", json!(1)), KeyValue::new("b", json!(2))])
            .await
            .unwrap();

        assert_eq!(adapter.len(), 2);
        assert_eq!(adapter.batches().len(), 1);
        assert_eq!(adapter.value("b"), Some(json!(2)));
    }
}
