// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A cache of entities with request-specific mutations applied.
//!
//! Entries are keyed by the entity and a hash of the mutations. Hashes may
//! collide, so every entry also stores the full mutation key (its tie
//! breaker) and reads that find a different one miss.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dl_dyncfg::ConfigSet;
use dl_ore::metric;
use dl_ore::metrics::{IntCounter, MetricsRegistry};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::stream::LocalKeyRepresentation;
use crate::MUTATION_CACHE_TTL;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cannot encode cache entry: {0}")]
    Encoding(String),
}

/// Identifies a set of mutations.
pub trait MutationKey: fmt::Debug + Send + Sync {
    /// A short digest of the key.
    fn hash(&self) -> String;

    /// The full key, compared on read to detect digest collisions.
    fn tie_breaker(&self) -> String;
}

impl MutationKey for LocalKeyRepresentation {
    fn hash(&self) -> String {
        self.digest()
    }

    fn tie_breaker(&self) -> String {
        self.parts()
            .iter()
            .map(|p| format!("{}={}", p.kind, p.value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An entity with mutations applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationCacheEntry {
    pub entity_kind: String,
    pub entity_id: String,
    pub entity_revision: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    tie_breaker: String,
    entry: MutationCacheEntry,
}

/// Where cache entries are kept.
#[async_trait]
pub trait CacheEngine: fmt::Debug + Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
}

/// Values with expiry instants, keyed by string.
#[derive(Debug, Default)]
struct ExpiringMap {
    entries: BTreeMap<String, (Instant, Vec<u8>)>,
}

impl ExpiringMap {
    /// Values stay readable up to and including their expiry instant.
    fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some((expires, value)) if now <= *expires => return Some(value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Also drops every entry that has expired by now.
    fn set(&mut self, key: &str, value: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        self.entries.retain(|_, (expires, _)| now <= *expires);
        self.entries.insert(key.to_string(), (now + ttl, value));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Keeps entries in process.
#[derive(Debug, Default)]
pub struct MemoryCacheEngine {
    entries: Mutex<ExpiringMap>,
}

impl MemoryCacheEngine {
    pub fn new() -> MemoryCacheEngine {
        MemoryCacheEngine::default()
    }
}

#[async_trait]
impl CacheEngine for MemoryCacheEngine {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.lock().expect("lock poisoned").get(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries.lock().expect("lock poisoned").set(key, value, ttl);
        Ok(())
    }
}

/// A key-value store shared between processes whose values expire.
#[async_trait]
pub trait TtlStore: fmt::Debug + Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
}

/// An in-memory [`TtlStore`].
#[derive(Debug, Default)]
pub struct MemTtlStore {
    entries: Mutex<ExpiringMap>,
}

impl MemTtlStore {
    pub fn new() -> MemTtlStore {
        MemTtlStore::default()
    }
}

#[async_trait]
impl TtlStore for MemTtlStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.lock().expect("lock poisoned").get(key))
    }

    async fn set_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries.lock().expect("lock poisoned").set(key, value, ttl);
        Ok(())
    }
}

/// Keeps entries in a [`TtlStore`], under a namespace of its own.
#[derive(Debug)]
pub struct SharedCacheEngine {
    store: Arc<dyn TtlStore>,
}

impl SharedCacheEngine {
    const NAMESPACE: &'static str = "dl_mutation_cache";

    pub fn new(store: Arc<dyn TtlStore>) -> SharedCacheEngine {
        SharedCacheEngine { store }
    }

    fn key(key: &str) -> String {
        format!("{}/{}", Self::NAMESPACE, key)
    }
}

#[async_trait]
impl CacheEngine for SharedCacheEngine {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.store.get(&Self::key(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.store.set_with_expiry(&Self::key(key), value, ttl).await
    }
}

#[derive(Debug, Clone)]
pub struct MutationCacheMetrics {
    hits: IntCounter,
    misses: IntCounter,
    saves: IntCounter,
}

impl MutationCacheMetrics {
    pub fn register_with(registry: &MetricsRegistry) -> MutationCacheMetrics {
        MutationCacheMetrics {
            hits: registry.register(metric!(
                name: "dl_mutation_cache_hits",
                help: "The number of mutated entities read from the mutation cache.",
            )),
            misses: registry.register(metric!(
                name: "dl_mutation_cache_misses",
                help: "The number of mutation cache reads that found nothing usable.",
            )),
            saves: registry.register(metric!(
                name: "dl_mutation_cache_saves",
                help: "The number of mutated entities written to the mutation cache.",
            )),
        }
    }

    pub fn hits(&self) -> u64 {
        u64::try_from(self.hits.get()).unwrap_or(0)
    }

    pub fn misses(&self) -> u64 {
        u64::try_from(self.misses.get()).unwrap_or(0)
    }

    pub fn saves(&self) -> u64 {
        u64::try_from(self.saves.get()).unwrap_or(0)
    }
}

/// Caches mutated entities for [`MUTATION_CACHE_TTL`].
///
/// Read failures of the backend are logged and count as misses.
#[derive(Debug)]
pub struct MutationCache {
    engine: Arc<dyn CacheEngine>,
    configs: ConfigSet,
    metrics: MutationCacheMetrics,
}

impl MutationCache {
    pub fn new(
        engine: Arc<dyn CacheEngine>,
        configs: &ConfigSet,
        metrics: MutationCacheMetrics,
    ) -> MutationCache {
        MutationCache {
            engine,
            configs: configs.clone(),
            metrics,
        }
    }

    fn ttl(&self) -> Duration {
        MUTATION_CACHE_TTL.get(&self.configs)
    }

    fn storage_key(&self, kind: &str, id: &str, revision: &str, key: &dyn MutationKey) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            kind,
            id,
            revision,
            key.hash(),
            self.ttl().as_secs()
        )
    }

    pub async fn get_mutated_entry_from_cache(
        &self,
        kind: &str,
        id: &str,
        revision: &str,
        key: &dyn MutationKey,
    ) -> Option<MutationCacheEntry> {
        let storage_key = self.storage_key(kind, id, revision, key);
        let found = match self.engine.get(&storage_key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "mutation cache read failed");
                None
            }
        };
        let stored = found.and_then(|bytes| match serde_json::from_slice::<StoredEntry>(&bytes) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(key = %storage_key, error = %e, "undecodable mutation cache entry");
                None
            }
        });
        match stored {
            Some(stored) if stored.tie_breaker == key.tie_breaker() => {
                self.metrics.hits.inc();
                Some(stored.entry)
            }
            Some(_) => {
                debug!(key = %storage_key, "mutation key hash collision");
                self.metrics.misses.inc();
                None
            }
            None => {
                self.metrics.misses.inc();
                None
            }
        }
    }

    pub async fn save_mutation_cache(
        &self,
        entry: MutationCacheEntry,
        key: &dyn MutationKey,
    ) -> Result<(), CacheError> {
        let storage_key = self.storage_key(&entry.entity_kind, &entry.entity_id, &entry.entity_revision, key);
        let stored = StoredEntry {
            tie_breaker: key.tie_breaker(),
            entry,
        };
        let bytes = serde_json::to_vec(&stored).map_err(|e| CacheError::Encoding(e.to_string()))?;
        self.engine.set(&storage_key, bytes, self.ttl()).await?;
        self.metrics.saves.inc();
        debug!(key = %storage_key, "saved mutated entity");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A key whose hash ignores everything but its length.
    #[derive(Debug)]
    struct WeakKey(String);

    impl MutationKey for WeakKey {
        fn hash(&self) -> String {
            self.0.len().to_string()
        }

        fn tie_breaker(&self) -> String {
            self.0.clone()
        }
    }

    fn entry(revision: &str) -> MutationCacheEntry {
        MutationCacheEntry {
            entity_kind: "dataset".into(),
            entity_id: "ds1".into(),
            entity_revision: revision.into(),
            data: serde_json::json!({"fields": ["Sales", "Double"]}),
        }
    }

    fn caches(configs: &ConfigSet) -> Vec<(MutationCache, MutationCacheMetrics)> {
        let engines: Vec<Arc<dyn CacheEngine>> = vec![
            Arc::new(MemoryCacheEngine::new()),
            Arc::new(SharedCacheEngine::new(Arc::new(MemTtlStore::new()))),
        ];
        engines
            .into_iter()
            .map(|engine| {
                let metrics = MutationCacheMetrics::register_with(&MetricsRegistry::new());
                (MutationCache::new(engine, configs, metrics.clone()), metrics)
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let configs = crate::all_dyncfgs(ConfigSet::default());
        let key = LocalKeyRepresentation::new().extend("update", "add field Double");
        for (cache, metrics) in caches(&configs) {
            assert_eq!(cache.get_mutated_entry_from_cache("dataset", "ds1", "r1", &key).await, None);
            cache.save_mutation_cache(entry("r1"), &key).await.unwrap();

            tokio::time::advance(Duration::from_secs(60)).await;
            assert_eq!(
                cache.get_mutated_entry_from_cache("dataset", "ds1", "r1", &key).await,
                Some(entry("r1"))
            );
            // Another revision is another entity.
            assert_eq!(cache.get_mutated_entry_from_cache("dataset", "ds1", "r2", &key).await, None);

            tokio::time::advance(Duration::from_millis(1)).await;
            assert_eq!(cache.get_mutated_entry_from_cache("dataset", "ds1", "r1", &key).await, None);
            assert_eq!((metrics.hits(), metrics.misses(), metrics.saves()), (1, 3, 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collisions_miss() {
        let configs = crate::all_dyncfgs(ConfigSet::default());
        for (cache, _) in caches(&configs) {
            cache.save_mutation_cache(entry("r1"), &WeakKey("ab".into())).await.unwrap();
            assert_eq!(
                cache
                    .get_mutated_entry_from_cache("dataset", "ds1", "r1", &WeakKey("cd".into()))
                    .await,
                None
            );
            assert_eq!(
                cache
                    .get_mutated_entry_from_cache("dataset", "ds1", "r1", &WeakKey("ab".into()))
                    .await,
                Some(entry("r1"))
            );
            // Last write wins.
            cache.save_mutation_cache(entry("r1"), &WeakKey("cd".into())).await.unwrap();
            assert_eq!(
                cache
                    .get_mutated_entry_from_cache("dataset", "ds1", "r1", &WeakKey("ab".into()))
                    .await,
                None
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_expired_entries() {
        let mut map = ExpiringMap::default();
        map.set("a", vec![1], Duration::from_secs(10));
        map.set("b", vec![2], Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(11)).await;
        // "a" is never read again, but the next write removes it.
        map.set("c", vec![3], Duration::from_secs(10));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), None);
        assert_eq!(map.get("b"), Some(vec![2]));
        assert_eq!(map.get("c"), Some(vec![3]));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_follows_config() {
        let configs = crate::all_dyncfgs(ConfigSet::default());
        MUTATION_CACHE_TTL.set(&configs, Duration::from_secs(5));
        let key = LocalKeyRepresentation::new();
        for (cache, _) in caches(&configs) {
            cache.save_mutation_cache(entry("r1"), &key).await.unwrap();
            tokio::time::advance(Duration::from_secs(6)).await;
            assert_eq!(cache.get_mutated_entry_from_cache("dataset", "ds1", "r1", &key).await, None);
        }
    }
}
