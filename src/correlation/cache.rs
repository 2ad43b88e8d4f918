//! Process-local LRU cache for analysis artifacts.
//!
//! Entries are keyed by `(head, data hash, options hash)`. The options hash
//! leaves out `now`, so a hit may come from an earlier instant and gets
//! re-stamped. The map and the recency list sit behind one mutex, so a put and
//! its eviction happen in a single critical section.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::analysis::{AnalysisBundle, AnalysisOptions, analyze};
use crate::models::Issue;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 10;

/// Length of a short fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 12;

/// Short SHA-256 fingerprint of a value's JSON form.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let hash_hex = format!("{:x}", hasher.finalize());
    hash_hex[..FINGERPRINT_LEN].to_string()
}

/// Fingerprint of a record set, independent of record order.
pub fn data_hash(records: &[Issue]) -> String {
    let mut sorted: Vec<&Issue> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    fingerprint(&sorted)
}

/// Fingerprint of the result-shaping fields of `opts`.
pub fn options_hash(opts: &AnalysisOptions) -> String {
    fingerprint(opts)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub head: String,
    pub data_hash: String,
    pub options_hash: String,
}

impl CacheKey {
    pub fn new(head: impl Into<String>, data_hash: impl Into<String>, options_hash: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            data_hash: data_hash.into(),
            options_hash: options_hash.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.head, self.data_hash, self.options_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

struct Entry<V> {
    value: Arc<V>,
    inserted: Instant,
    created_at: DateTime<Utc>,
}

struct Inner<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    /// Least recently used at the front
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

impl<V> Inner<V> {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.clone());
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

/// Bounded, age-limited LRU map.
pub struct LruCache<V> {
    max_age: Duration,
    max_entries: usize,
    inner: Mutex<Inner<V>>,
}

impl<V> Default for LruCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE, DEFAULT_MAX_ENTRIES)
    }
}

impl<V> LruCache<V> {
    /// Zero bounds fall back to the defaults.
    pub fn new(max_age: Duration, max_entries: usize) -> Self {
        Self {
            max_age: if max_age.is_zero() { DEFAULT_MAX_AGE } else { max_age },
            max_entries: if max_entries == 0 {
                DEFAULT_MAX_ENTRIES
            } else {
                max_entries
            },
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up `key`, dropping it if older than the max age.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.inserted.elapsed() > self.max_age,
        };
        if expired {
            debug!(key = %key, "Cache entry expired");
            inner.remove(key);
            inner.misses += 1;
            return None;
        }
        inner.hits += 1;
        inner.touch(key);
        inner.entries.get(key).map(|e| Arc::clone(&e.value))
    }

    /// Insert or replace `key`, evicting the least recently used entry on overflow.
    pub fn put(&self, key: CacheKey, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut inner = self.lock();
        let entry = Entry {
            value: Arc::clone(&value),
            inserted: Instant::now(),
            created_at: Utc::now(),
        };
        if inner.entries.insert(key.clone(), entry).is_none() {
            while inner.entries.len() > self.max_entries {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                debug!(key = %oldest, "Evicting cache entry");
                inner.entries.remove(&oldest);
            }
        }
        inner.touch(&key);
        value
    }

    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Keep only entries computed at `head` over records hashing to `data_hash`.
    pub fn retain_snapshot(&self, head: &str, data_hash: &str) {
        let keep = |k: &CacheKey| k.head == head && k.data_hash == data_hash;
        let mut inner = self.lock();
        inner.entries.retain(|k, _| keep(k));
        inner.order.retain(|k| keep(k));
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_entries,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            oldest_entry: inner.entries.values().map(|e| e.created_at).min(),
            newest_entry: inner.entries.values().map(|e| e.created_at).max(),
        }
    }
}

fn restamped(bundle: &AnalysisBundle, now: DateTime<Utc>) -> AnalysisBundle {
    let mut bundle = bundle.clone();
    bundle.generated_at = now;
    bundle.plan.generated_at = now;
    bundle.labels.generated_at = now;
    bundle
}

/// [`analyze`] behind an [`LruCache`].
pub struct CachedEngine {
    cache: LruCache<AnalysisBundle>,
}

impl Default for CachedEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE, DEFAULT_MAX_ENTRIES)
    }
}

impl CachedEngine {
    pub fn new(max_age: Duration, max_entries: usize) -> Self {
        Self {
            cache: LruCache::new(max_age, max_entries),
        }
    }

    /// Analyze `records`, reusing a cached bundle for the same inputs.
    ///
    /// `data_hash` is the store's fingerprint of `records`. A miss drops every
    /// entry computed at another head or over other data. A hit is re-stamped
    /// with `opts.now`; everything else in it is reused as computed.
    pub fn analyze(
        &self,
        head: &str,
        data_hash: &str,
        records: &[Issue],
        opts: &AnalysisOptions,
    ) -> Arc<AnalysisBundle> {
        let key = CacheKey::new(head, data_hash, options_hash(opts));
        if let Some(hit) = self.cache.get(&key) {
            debug!(key = %key, "Cache hit");
            if hit.generated_at == opts.now {
                return hit;
            }
            return Arc::new(restamped(&hit, opts.now));
        }
        debug!(key = %key, "Cache miss");
        self.cache.retain_snapshot(head, data_hash);
        self.cache.put(key, analyze(records, opts))
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{issue, now, with_status};
    use crate::models::Status;

    fn key(head: &str) -> CacheKey {
        CacheKey::new(head, "b", "c")
    }

    #[test]
    fn test_cache_key_display() {
        assert_eq!(CacheKey::new("abc123", "def456", "opt789").to_string(), "abc123:def456:opt789");
        assert_eq!(CacheKey::default().to_string(), "::");
    }

    #[test]
    fn test_defaults_on_zero_bounds() {
        let cache: LruCache<u32> = LruCache::new(Duration::ZERO, 0);
        assert_eq!(cache.max_age(), DEFAULT_MAX_AGE);
        assert_eq!(cache.max_entries(), DEFAULT_MAX_ENTRIES);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_then_get() {
        let cache = LruCache::default();
        assert!(cache.get(&key("a")).is_none());
        cache.put(key("a"), 5);
        assert_eq!(cache.get(&key("a")).as_deref(), Some(&5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_existing_updates_in_place() {
        let cache = LruCache::default();
        cache.put(key("a"), 5);
        cache.put(key("a"), 10);
        assert_eq!(cache.get(&key("a")).as_deref(), Some(&10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LruCache::new(DEFAULT_MAX_AGE, 3);
        cache.put(key("a"), 1);
        cache.put(key("b"), 2);
        cache.put(key("c"), 3);
        cache.get(&key("a"));
        cache.put(key("d"), 4);
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("d")).is_some());
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache = LruCache::new(Duration::from_millis(10), 10);
        cache.put(key("a"), 1);
        assert!(cache.get(&key("a")).is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_invalidate_all() {
        let cache = LruCache::default();
        for head in ["a", "b", "c"] {
            cache.put(key(head), 0);
        }
        cache.invalidate();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_retain_snapshot_keeps_current() {
        let cache = LruCache::default();
        cache.put(CacheKey::new("head1", "b", "c"), 1);
        cache.put(CacheKey::new("head1", "b", "e"), 2);
        cache.put(CacheKey::new("head1", "d", "c"), 3);
        cache.put(CacheKey::new("head2", "b", "c"), 4);
        cache.retain_snapshot("head1", "b");
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::new("head2", "b", "c")).is_none());
        assert!(cache.get(&CacheKey::new("head1", "d", "c")).is_none());
        assert!(cache.get(&CacheKey::new("head1", "b", "c")).is_some());
        assert!(cache.get(&CacheKey::new("head1", "b", "e")).is_some());
    }

    #[test]
    fn test_stats() {
        let cache = LruCache::new(DEFAULT_MAX_AGE, 10);
        let empty = cache.stats();
        assert_eq!(empty.size, 0);
        assert_eq!(empty.max_size, 10);
        assert!(empty.oldest_entry.is_none());

        cache.put(key("a"), 1);
        cache.put(key("b"), 2);
        cache.get(&key("a"));
        cache.get(&key("z"));
        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate, 0.5);
        assert!(stats.oldest_entry <= stats.newest_entry);
    }

    #[test]
    fn test_data_hash() {
        let a = data_hash(&[issue("bv-1"), with_status(issue("bv-2"), Status::Closed)]);
        let b = data_hash(&[with_status(issue("bv-2"), Status::Closed), issue("bv-1")]);
        let c = data_hash(&[issue("bv-1"), issue("bv-2")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_options_hash() {
        let base = AnalysisOptions::at(now());
        let mut other = base.clone();
        other.max_tracks = 3;
        assert_eq!(options_hash(&base), options_hash(&AnalysisOptions::at(now())));
        assert_ne!(options_hash(&base), options_hash(&other));
    }

    #[test]
    fn test_cached_engine_hit_and_miss() {
        let engine = CachedEngine::default();
        let records = vec![issue("a")];
        let opts = AnalysisOptions::at(now());
        let hash = data_hash(&records);

        let first = engine.analyze("head", &hash, &records, &opts);
        let second = engine.analyze("head", &hash, &records, &opts);
        assert!(Arc::ptr_eq(&first, &second));
        let stats = engine.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate, 0.5);

        let mut changed = opts.clone();
        changed.max_tracks = 2;
        engine.analyze("head", &hash, &records, &changed);
        assert_eq!(engine.stats().misses, 2);
        assert_eq!(engine.stats().size, 2);

        engine.analyze("head2", &hash, &records, &opts);
        assert_eq!(engine.stats().size, 1);

        engine.invalidate();
        assert_eq!(engine.stats().size, 0);
    }

    #[test]
    fn test_cached_engine_drops_entries_for_old_data() {
        let engine = CachedEngine::default();
        let opts = AnalysisOptions::at(now());
        let before = vec![issue("a")];
        let after = vec![issue("a"), issue("b")];

        engine.analyze("head", &data_hash(&before), &before, &opts);
        let fresh = engine.analyze("head", &data_hash(&after), &after, &opts);
        assert_eq!(fresh.issue_count, 2);
        assert_eq!(engine.stats().size, 1);

        let again = engine.analyze("head", &data_hash(&after), &after, &opts);
        assert!(Arc::ptr_eq(&fresh, &again));
    }

    #[test]
    fn test_cached_engine_restamps_hits() {
        let engine = CachedEngine::default();
        let records = vec![issue("a")];
        let hash = data_hash(&records);
        let first = engine.analyze("head", &hash, &records, &AnalysisOptions::at(now()));

        let later = now() + chrono::Duration::seconds(30);
        let second = engine.analyze("head", &hash, &records, &AnalysisOptions::at(later));
        assert_eq!(engine.stats().hits, 1);
        assert_eq!(first.generated_at, now());
        assert_eq!(second.generated_at, later);
        assert_eq!(second.plan.generated_at, later);
        assert_eq!(second.labels.generated_at, later);
        assert_eq!(second.issue_count, first.issue_count);
    }
}
