// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Memoized parsing.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use dl_dyncfg::ConfigSet;
use dl_ore::metric;
use dl_ore::metrics::{IntCounter, MetricsRegistry};
use lru::LruCache;
use tracing::debug;

use crate::ast::Formula;
use crate::error::ParseError;
use crate::parser::parse_formula;
use crate::PARSE_CACHE_SIZE;

/// Counters for a [`ParseCache`].
#[derive(Debug, Clone)]
pub struct ParseCacheMetrics {
    hits: IntCounter,
    misses: IntCounter,
}

impl ParseCacheMetrics {
    pub fn register_with(registry: &MetricsRegistry) -> ParseCacheMetrics {
        ParseCacheMetrics {
            hits: registry.register(metric!(
                name: "dl_formula_parse_cache_hits",
                help: "The number of formula parses answered from the parse cache.",
            )),
            misses: registry.register(metric!(
                name: "dl_formula_parse_cache_misses",
                help: "The number of formula parses that ran the parser.",
            )),
        }
    }

    pub fn hits(&self) -> u64 {
        u64::try_from(self.hits.get()).unwrap_or(0)
    }

    pub fn misses(&self) -> u64 {
        u64::try_from(self.misses.get()).unwrap_or(0)
    }
}

/// A bounded LRU cache of parsed formulas keyed by formula text.
///
/// The capacity follows `formula_parse_cache_size` and is re-read on every
/// call, so changes to the config take effect without a restart. Failed
/// parses are not cached.
#[derive(Debug)]
pub struct ParseCache {
    configs: ConfigSet,
    cache: Mutex<LruCache<String, Arc<Formula>>>,
    metrics: ParseCacheMetrics,
}

impl ParseCache {
    pub fn new(configs: &ConfigSet, metrics: ParseCacheMetrics) -> ParseCache {
        let capacity = capacity(configs);
        ParseCache {
            configs: configs.clone(),
            cache: Mutex::new(LruCache::new(capacity)),
            metrics,
        }
    }

    /// Parses `text`, returning a shared formula from the cache if the same
    /// text was parsed recently.
    pub fn parse(&self, text: &str) -> Result<Arc<Formula>, ParseError> {
        {
            let mut cache = self.cache.lock().expect("lock poisoned");
            let capacity = capacity(&self.configs);
            if cache.cap() != capacity {
                cache.resize(capacity);
            }
            if let Some(formula) = cache.get(text) {
                self.metrics.hits.inc();
                return Ok(Arc::clone(formula));
            }
        }
        self.metrics.misses.inc();
        debug!(formula = text, "formula parse cache miss");
        let formula = Arc::new(parse_formula(text)?);
        self.cache
            .lock()
            .expect("lock poisoned")
            .put(text.to_string(), Arc::clone(&formula));
        Ok(formula)
    }

    /// The number of cached formulas.
    pub fn len(&self) -> usize {
        self.cache.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn capacity(configs: &ConfigSet) -> NonZeroUsize {
    NonZeroUsize::new(PARSE_CACHE_SIZE.get(configs)).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (ParseCache, ConfigSet) {
        let configs = crate::all_dyncfgs(ConfigSet::default());
        let metrics = ParseCacheMetrics::register_with(&MetricsRegistry::new());
        (ParseCache::new(&configs, metrics), configs)
    }

    #[test]
    fn hits_and_misses() {
        let (cache, _) = cache();
        let a = cache.parse("SUM([x])").unwrap();
        let b = cache.parse("SUM([x])").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.metrics.hits(), 1);
        assert_eq!(cache.metrics.misses(), 1);
    }

    #[test]
    fn errors_are_not_cached() {
        let (cache, _) = cache();
        assert!(cache.parse("1 +").is_err());
        assert!(cache.parse("1 +").is_err());
        assert_eq!(cache.metrics.misses(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_follows_config() {
        let (cache, configs) = cache();
        PARSE_CACHE_SIZE.set(&configs, 2);
        for text in ["1", "2", "3"] {
            cache.parse(text).unwrap();
        }
        assert_eq!(cache.len(), 2);
        // The oldest entry was evicted.
        cache.parse("1").unwrap();
        assert_eq!(cache.metrics.misses(), 4);
    }
}
