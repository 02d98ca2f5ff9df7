//! Write-through cache in front of a state adapter.

use crate::config::CacheConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use keel_core::{Context, Error, KeyValue, Result, StateAdapter, Value};
use keel_log::Logger;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
    /// Write that stored the entry; 0 for read-through fills.
    version: u64,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// TTL cache fronting a [`StateAdapter`].
///
/// Reads are served from memory while fresh and fall through to the adapter
/// otherwise; only hits from the adapter are cached. Writes go to memory
/// first, then to the adapter, either directly or through the batch worker.
/// The adapter stays the source of truth.
///
/// Background tasks are spawned on construction, so a proxy must be created
/// inside a Tokio runtime. Call [`shutdown`](Self::shutdown) to flush queued
/// batch writes; dropping the proxy stops the tasks without flushing.
pub struct CacheProxy {
    adapter: Arc<dyn StateAdapter>,
    entries: Arc<DashMap<String, CacheEntry>>,
    /// Bumped before every write touches memory.
    writes: AtomicU64,
    batch_tx: Option<mpsc::Sender<KeyValue>>,
    config: CacheConfig,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheProxy {
    pub fn new(adapter: Arc<dyn StateAdapter>, config: CacheConfig) -> Self {
        let entries = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        if !config.cleanup_interval.is_zero() {
            tasks.push(tokio::spawn(sweep(
                entries.clone(),
                config.cleanup_interval,
                shutdown.clone(),
                config.logger.clone(),
            )));
        }

        let batch_tx = if config.use_batch {
            let (tx, rx) = mpsc::channel(config.batch_channel_capacity.max(1));
            let writer = BatchWriter {
                adapter: adapter.clone(),
                buffer_interval: config.batch_buffer_interval,
                timeout: config.batch_timeout,
                logger: config.logger.clone(),
            };
            tasks.push(tokio::spawn(writer.run(rx, shutdown.clone())));
            Some(tx)
        } else {
            None
        };

        keel_log::debug!(
            logger: config.logger,
            "Cache proxy started (ttl {:?}, batch {})",
            config.item_expiration,
            config.use_batch
        );

        Self {
            adapter,
            entries,
            writes: AtomicU64::new(0),
            batch_tx,
            config,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of entries in memory, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` has a fresh entry in memory.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fresh(key).is_some()
    }

    /// Drop expired entries now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, Instant::now())
    }

    /// Stop background tasks, flushing buffered batch writes once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                keel_log::error!(logger: self.config.logger, "Cache task failed: {}", err);
            }
        }
    }

    fn fresh(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_fresh(now));
        }
        value
    }

    fn next_write(&self) -> u64 {
        self.writes.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn new_entry(&self, value: Value, now: Instant, version: u64) -> CacheEntry {
        CacheEntry {
            value,
            expires_at: now + self.config.item_expiration,
            version,
        }
    }

    /// Cache `value`, read from the adapter when the write counter stood
    /// at `seen`. Skipped if a fresh entry exists or any write happened
    /// since, so a slow read never shadows a newer write. Returns the value
    /// the reader should see.
    fn fill(&self, key: &str, value: Value, seen: u64) -> Value {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().is_fresh(now) => entry.get().value.clone(),
            _ if self.writes.load(Ordering::SeqCst) != seen => value,
            Entry::Occupied(mut entry) => {
                entry.insert(self.new_entry(value.clone(), now, 0));
                value
            }
            Entry::Vacant(entry) => {
                entry.insert(self.new_entry(value.clone(), now, 0));
                value
            }
        }
    }
}

#[async_trait]
impl StateAdapter for CacheProxy {
    async fn has(&self, ctx: &Context, key: &str) -> Result<bool> {
        if self.contains_key(key) {
            return Ok(true);
        }
        self.adapter.has(ctx, key).await
    }

    async fn get(&self, ctx: &Context, key: &str) -> Result<Value> {
        if let Some(value) = self.fresh(key) {
            return Ok(value);
        }
        let seen = self.writes.load(Ordering::SeqCst);
        let value = self.adapter.get(ctx, key).await?;
        Ok(self.fill(key, value, seen))
    }

    async fn set(&self, ctx: &Context, key: &str, value: Value) -> Result<()> {
        let version = self.next_write();
        self.entries.insert(
            key.to_string(),
            self.new_entry(value.clone(), Instant::now(), version),
        );

        let written = match &self.batch_tx {
            Some(tx) => tx
                .send(KeyValue::new(key, value))
                .await
                .map_err(|_| Error::internal("batch writer stopped")),
            None => self.adapter.set(ctx, key, value).await,
        };
        if written.is_err() {
            // A later write to the same key keeps its entry.
            self.entries.remove_if(key, |_, entry| entry.version == version);
        }
        written
    }

    async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        self.next_write();
        self.entries.remove(key);
        match self.adapter.delete(ctx, key).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn batch_set(&self, ctx: &Context, items: Vec<KeyValue>) -> Result<()> {
        self.next_write();
        for item in &items {
            self.entries.remove(&item.key);
        }
        self.adapter.batch_set(ctx, items).await
    }
}

impl Drop for CacheProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for CacheProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProxy")
            .field("entries", &self.entries.len())
            .field("batch", &self.batch_tx.is_some())
            .finish()
    }
}

fn purge(entries: &DashMap<String, CacheEntry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_fresh(now));
    before.saturating_sub(entries.len())
}

async fn sweep(
    entries: Arc<DashMap<String, CacheEntry>>,
    interval: Duration,
    shutdown: CancellationToken,
    logger: Logger,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = purge(&entries, Instant::now());
                if removed > 0 {
                    keel_log::debug!(logger: logger, "Swept {} expired cache entries", removed);
                }
            }
        }
    }
}

/// Background consumer of the batch channel.
struct BatchWriter {
    adapter: Arc<dyn StateAdapter>,
    buffer_interval: Duration,
    timeout: Duration,
    logger: Logger,
}

impl BatchWriter {
    async fn run(self, mut rx: mpsc::Receiver<KeyValue>, shutdown: CancellationToken) {
        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                item = rx.recv() => item,
            };
            let Some(first) = first else { break };

            let mut window = vec![first];
            let mut stopping = false;
            let deadline = tokio::time::sleep(self.buffer_interval);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = shutdown.cancelled() => {
                        stopping = true;
                        break;
                    }
                    item = rx.recv() => match item {
                        Some(item) => window.push(item),
                        None => {
                            stopping = true;
                            break;
                        }
                    },
                }
            }

            self.flush(window).await;
            if stopping {
                break;
            }
        }

        rx.close();
        let mut rest = Vec::new();
        while let Ok(item) = rx.try_recv() {
            rest.push(item);
        }
        if !rest.is_empty() {
            self.flush(rest).await;
        }
        keel_log::debug!(logger: self.logger, "Batch writer stopped");
    }

    async fn flush(&self, window: Vec<KeyValue>) {
        let items = dedupe(window);
        let count = items.len();
        let ctx = Context::background().with_timeout(self.timeout);

        match ctx.run(self.adapter.batch_set(&ctx, items)).await {
            Ok(()) => keel_log::debug!(logger: self.logger, "Flushed batch of {} keys", count),
            Err(err) => keel_log::error!(
                logger: self.logger,
                "Batch write of {} keys failed: {}",
                count,
                err
            ),
        }
    }
}

/// Last write per key wins; keys keep their first-seen order.
fn dedupe(window: Vec<KeyValue>) -> Vec<KeyValue> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(window.len());
    let mut items: Vec<KeyValue> = Vec::with_capacity(window.len());
    for item in window {
        match index.get(&item.key) {
            Some(&at) => items[at].value = item.value,
            None => {
                index.insert(item.key.clone(), items.len());
                items.push(item);
            }
        }
    }
    items
}
