//! State service: breaker-guarded access to the state adapter.

use crate::cache::CacheProxy;
use crate::config::StateServiceConfig;
use keel_core::resilience::CircuitBreaker;
use keel_core::{Context, KeyValue, Result, StateAdapter, Value};
use keel_log::Logger;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Key/value access for application code.
///
/// Every call runs inside the state [`CircuitBreaker`] and is raced against
/// the caller's [`Context`]. When a cache is configured, calls go through a
/// [`CacheProxy`] in front of the adapter.
///
/// ```rust,ignore
/// let state = StateService::new(adapter, StateServiceConfig::new().cache(CacheConfig::new()));
///
/// state.set(&ctx, "user:1", &user).await?;
/// let user: Option<User> = state.get(&ctx, "user:1").await?;
/// ```
pub struct StateService {
    store: Arc<dyn StateAdapter>,
    cache: Option<Arc<CacheProxy>>,
    breaker: Arc<CircuitBreaker>,
    logger: Logger,
}

impl StateService {
    /// Create the service. With a cache configured this spawns the cache's
    /// background tasks and must run inside a Tokio runtime.
    pub fn new(adapter: Arc<dyn StateAdapter>, config: StateServiceConfig) -> Self {
        let cache = config.cache.map(|cache| {
            Arc::new(CacheProxy::new(
                adapter.clone(),
                cache.logger(config.logger.clone()),
            ))
        });
        let store: Arc<dyn StateAdapter> = match &cache {
            Some(cache) => cache.clone(),
            None => adapter,
        };

        Self {
            store,
            cache,
            breaker: CircuitBreaker::new(config.breaker.logger(config.logger.clone())),
            logger: config.logger,
        }
    }

    /// Cache in front of the adapter, if configured.
    pub fn cache(&self) -> Option<&Arc<CacheProxy>> {
        self.cache.as_ref()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Whether `key` exists.
    pub async fn has(&self, ctx: &Context, key: &str) -> Result<bool> {
        self.breaker
            .execute(|| ctx.run(self.store.has(ctx, key)))
            .await
    }

    /// Raw value of `key`, `None` if missing.
    pub async fn get_raw(&self, ctx: &Context, key: &str) -> Result<Option<Value>> {
        match self
            .breaker
            .execute(|| ctx.run(self.store.get(ctx, key)))
            .await
        {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Typed value of `key`, `None` if missing.
    pub async fn get<T: DeserializeOwned>(&self, ctx: &Context, key: &str) -> Result<Option<T>> {
        match self.get_raw(ctx, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Decode `key` into `dest`. Returns `false` and leaves `dest`
    /// untouched if the key is missing.
    pub async fn get_into<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        key: &str,
        dest: &mut T,
    ) -> Result<bool> {
        match self.get(ctx, key).await? {
            Some(value) => {
                *dest = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Store `value` under `key`.
    pub async fn set<T: Serialize + ?Sized>(&self, ctx: &Context, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_raw(ctx, key, value).await
    }

    pub async fn set_raw(&self, ctx: &Context, key: &str, value: Value) -> Result<()> {
        self.breaker
            .execute(|| ctx.run(self.store.set(ctx, key, value)))
            .await
    }

    /// Remove `key`. Removing a missing key succeeds.
    pub async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        match self
            .breaker
            .execute(|| ctx.run(self.store.delete(ctx, key)))
            .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Write many entries through the adapter's batch path.
    pub async fn batch_set(&self, ctx: &Context, items: Vec<KeyValue>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.breaker
            .execute(|| ctx.run(self.store.batch_set(ctx, items)))
            .await
    }

    /// Stop the cache, flushing queued batch writes.
    pub async fn shutdown(&self) {
        if let Some(cache) = &self.cache {
            cache.shutdown().await;
            keel_log::debug!(logger: self.logger, "State service cache stopped");
        }
    }
}

impl std::fmt::Debug for StateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateService")
            .field("cache", &self.cache)
            .field("breaker", &self.breaker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use keel_core::resilience::{CircuitBreakerConfig, CircuitState};
    use keel_core::{Error, ErrorKind};
    use keel_testing::InMemoryStateAdapter;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    fn service(adapter: &Arc<InMemoryStateAdapter>, config: StateServiceConfig) -> StateService {
        StateService::new(adapter.clone(), config.logger(Logger::null()))
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let adapter = Arc::new(InMemoryStateAdapter::new());
        let state = service(&adapter, StateServiceConfig::new());
        let ctx = Context::background();
        let alice = Profile {
            name: "alice".into(),
            age: 30,
        };

        state.set(&ctx, "profile:1", &alice).await.unwrap();
        assert!(state.has(&ctx, "profile:1").await.unwrap());
        assert_eq!(
            state.get::<Profile>(&ctx, "profile:1").await.unwrap(),
            Some(alice.clone())
        );

        let mut dest = Profile {
            name: String::new(),
            age: 0,
        };
        assert!(state.get_into(&ctx, "profile:1", &mut dest).await.unwrap());
        assert_eq!(dest, alice);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let adapter = Arc::new(InMemoryStateAdapter::new());
        let state = service(&adapter, StateServiceConfig::new());
        let ctx = Context::background();

        assert_eq!(state.get_raw(&ctx, "nope").await.unwrap(), None);
        let mut dest = 7u32;
        assert!(!state.get_into(&ctx, "nope", &mut dest).await.unwrap());
        assert_eq!(dest, 7);
        state.delete(&ctx, "nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_decode_error_is_internal() {
        let adapter = Arc::new(InMemoryStateAdapter::new());
        adapter.insert("n", serde_json::json!("not a number"));
        let state = service(&adapter, StateServiceConfig::new());

        let err = state
            .get::<u32>(&Context::background(), "n")
            .await
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_trips_and_recovers() {
        let adapter = Arc::new(InMemoryStateAdapter::new());
        let state = service(
            &adapter,
            StateServiceConfig::new().breaker(
                CircuitBreakerConfig::new("state")
                    .failure_count_threshold(3)
                    .break_duration(Duration::from_secs(30)),
            ),
        );
        let ctx = Context::background();
        adapter.fail_with(Error::internal("connection refused"));

        for _ in 0..3 {
            let err = state.has(&ctx, "k").await.unwrap_err();
            assert!(err.is_internal());
        }
        let err = state.has(&ctx, "k").await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(adapter.calls().method_call_count("has"), 3);

        adapter.clear_failure();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!state.has(&ctx, "k").await.unwrap());
        assert_eq!(state.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_not_found_does_not_trip_breaker() {
        let adapter = Arc::new(InMemoryStateAdapter::new());
        let state = service(
            &adapter,
            StateServiceConfig::new()
                .breaker(CircuitBreakerConfig::new("state").failure_count_threshold(1)),
        );
        let ctx = Context::background();

        for _ in 0..5 {
            assert_eq!(state.get_raw(&ctx, "missing").await.unwrap(), None);
        }
        assert_eq!(state.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_slow_adapter() {
        let adapter = Arc::new(InMemoryStateAdapter::new());
        adapter.set_latency(Duration::from_secs(5));
        let state = service(&adapter, StateServiceConfig::new());

        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let err = state.set(&ctx, "k", &1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(state.breaker().counts().total_failures, 0);
    }

    #[tokio::test]
    async fn test_cached_reads_skip_adapter() {
        let adapter = Arc::new(InMemoryStateAdapter::new());
        let state = service(&adapter, StateServiceConfig::new().cache(CacheConfig::new()));
        let ctx = Context::background();

        state.set(&ctx, "k", &"v").await.unwrap();
        assert_eq!(state.get::<String>(&ctx, "k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(adapter.calls().method_call_count("get"), 0);
        assert!(state.cache().is_some_and(|cache| cache.contains_key("k")));
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_set_goes_to_adapter() {
        let adapter = Arc::new(InMemoryStateAdapter::new());
        let state = service(&adapter, StateServiceConfig::new());
        let ctx = Context::background();

        state.batch_set(&ctx, Vec::new()).await.unwrap();
        assert_eq!(adapter.calls().call_count(), 0);

        state
            .batch_set(&ctx, vec![KeyValue::new("a", serde_json::json!(1))])
            .await
            .unwrap();
        assert_eq!(adapter.batches().len(), 1);
    }
}
