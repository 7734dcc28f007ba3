//! TTL cache of computed aggregates.

use crate::clock::Clock;
use crate::metrics::{AiMetrics, AutomationMetrics, MetricsSnapshot, TestCaseMetrics};
use crate::types::{Filters, Scope, Timestamp};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Hex characters of the filter digest kept in a key.
const FILTER_DIGEST_LEN: usize = 16;

/// Which aggregate a cache entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Snapshot,
    TestCases,
    Automation,
    Ai,
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Snapshot => "snapshot",
            AggregateKind::TestCases => "test_cases",
            AggregateKind::Automation => "automation",
            AggregateKind::Ai => "ai",
        }
    }
}

/// A cached aggregate.
#[derive(Clone, Debug, PartialEq)]
pub enum CachedAggregate {
    Snapshot(MetricsSnapshot),
    TestCases(TestCaseMetrics),
    Automation(AutomationMetrics),
    Ai(AiMetrics),
}

/// Cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries found but older than the TTL.
    pub expired: u64,
    /// Entries pushed out by the capacity bound.
    pub evictions: u64,
    /// Entries removed by invalidation.
    pub invalidated: u64,
}

struct CacheEntry {
    data: CachedAggregate,
    stored_at: Timestamp,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    /// Bumped by every invalidation.
    generation: u64,
    stats: CacheStats,
}

/// Substring shared by every key of a suite, across sprints, kinds and filters.
pub fn suite_key_prefix(suite_id: &str) -> String {
    format!("suite={}|", escape_key_part(suite_id))
}

/// Percent-escape key delimiters so an id can never spell another key's segments.
fn escape_key_part(part: &str) -> Cow<'_, str> {
    if !part.contains(|c| matches!(c, '%' | '|' | '=' | '*')) {
        return Cow::Borrowed(part);
    }
    let mut escaped = String::with_capacity(part.len() + 8);
    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '|' => escaped.push_str("%7C"),
            '=' => escaped.push_str("%3D"),
            '*' => escaped.push_str("%2A"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Build a deterministic cache key.
///
/// Equal filters always produce equal keys: `Filters` serializes its fields
/// in declaration order and its sets in sorted order.
pub fn cache_key(scope: &Scope, kind: AggregateKind, filters: &Filters) -> String {
    format!(
        "{}sprint={}|kind={}|filters={}",
        suite_key_prefix(&scope.suite_id),
        scope.sprint_id.as_deref().map_or(Cow::Borrowed("*"), escape_key_part),
        kind.as_str(),
        filters_digest(filters)
    )
}

fn filters_digest(filters: &Filters) -> String {
    if filters.is_empty() {
        return "none".to_string();
    }
    let canonical = match serde_json::to_vec(filters) {
        Ok(bytes) => bytes,
        Err(_) => format!("{:?}", filters).into_bytes(),
    };
    let digest = hex::encode(Sha256::digest(&canonical));
    digest[..FILTER_DIGEST_LEN].to_string()
}

/// In-memory aggregate cache.
///
/// Entries are valid while younger than the TTL and are evicted
/// least-recently-used once the capacity is reached.
pub struct MetricsCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
}

impl MetricsCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            ttl,
            clock,
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                generation: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a fresh entry. Expired entries are dropped and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CachedAggregate> {
        let now = self.clock.now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let lookup = inner.entries.get(key).map(|entry| {
            if now.elapsed_since(entry.stored_at) < self.ttl {
                Some(entry.data.clone())
            } else {
                None
            }
        });

        match lookup {
            Some(Some(data)) => {
                inner.stats.hits += 1;
                debug!(key, "cache hit");
                Some(data)
            }
            Some(None) => {
                inner.entries.pop(key);
                inner.stats.expired += 1;
                inner.stats.misses += 1;
                debug!(key, "cache entry expired");
                None
            }
            None => {
                inner.stats.misses += 1;
                debug!(key, "cache miss");
                None
            }
        }
    }

    /// Store an entry stamped with the current time, replacing any previous one.
    pub fn set(&self, key: impl Into<String>, data: CachedAggregate) {
        let mut inner = self.inner.lock();
        self.insert(&mut inner, key.into(), data);
    }

    /// Current invalidation generation, to pair with [`set_if_current`](Self::set_if_current).
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Store an entry only if nothing was invalidated since `generation` was read.
    ///
    /// Returns whether the entry was stored.
    pub fn set_if_current(
        &self,
        key: impl Into<String>,
        data: CachedAggregate,
        generation: u64,
    ) -> bool {
        let mut inner = self.inner.lock();
        let key = key.into();
        if inner.generation != generation {
            debug!(key = %key, "skipping cache write computed before invalidation");
            return false;
        }
        self.insert(&mut inner, key, data);
        true
    }

    fn insert(&self, inner: &mut CacheInner, key: String, data: CachedAggregate) {
        let entry = CacheEntry {
            data,
            stored_at: self.clock.now(),
        };
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry) {
            if evicted != key {
                inner.stats.evictions += 1;
            }
        }
    }

    /// Remove every entry whose key contains `pattern`. Returns how many were removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.generation += 1;

        let matching: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.contains(pattern))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            inner.entries.pop(key);
        }
        inner.stats.invalidated += matching.len() as u64;

        debug!(pattern, removed = matching.len(), "cache invalidated");
        matching.len()
    }

    /// Remove every entry of a suite, whatever the sprint, kind or filters.
    pub fn invalidate_suite(&self, suite_id: &str) -> usize {
        self.invalidate(&suite_key_prefix(suite_id))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let removed = inner.entries.len() as u64;
        inner.entries.clear();
        inner.stats.invalidated += removed;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}
