use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::dns::{common::normalize_name, enums::DNSResourceType};
use crate::resolver::ResolvedQuery;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub domain: String,
    pub record_type: DNSResourceType,
}

impl CacheKey {
    pub fn new(domain: &str, record_type: DNSResourceType) -> Self {
        Self {
            // DNS is case-insensitive
            domain: normalize_name(domain),
            record_type,
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Completed resolutions keyed by (name, type). Entries are overwritten on
/// every new result and only leave through explicit invalidation; there is
/// no TTL expiry.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: DashMap<CacheKey, ResolvedQuery>,
    stats: CacheStats,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str, rtype: DNSResourceType) -> Option<ResolvedQuery> {
        let key = CacheKey::new(name, rtype);
        match self.entries.get(&key) {
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Cache hit for {} {}", key.domain, rtype);
                Some(entry.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, name: &str, rtype: DNSResourceType, result: ResolvedQuery) {
        let key = CacheKey::new(name, rtype);
        debug!("Caching result for {} {}", key.domain, rtype);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key, result);
    }

    pub fn invalidate(&self, name: &str, rtype: DNSResourceType) -> bool {
        self.entries.remove(&CacheKey::new(name, rtype)).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
