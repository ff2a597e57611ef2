//! Wildcard resolver with parse and verdict caching
//!
//! Held permissions are parsed once and match verdicts are cached with a TTL,
//! so repeated checks against the same snapshot stay cheap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::types::{WildcardMatcher, WildcardPermission, WildcardSyntax};

/// Default cache TTL (60 seconds)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Size at which either cache sweeps stale entries
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    fn get(&self) -> Option<&T> {
        if self.is_expired() {
            None
        } else {
            Some(&self.value)
        }
    }
}

/// Statistics about resolver cache performance
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: usize,
    /// Number of cache misses
    pub misses: usize,
    /// Number of expired entries encountered
    pub expirations: usize,
    /// Total number of entries in cache
    pub entries: usize,
    /// Number of parsed strings held
    pub parsed: usize,
}

impl CacheStats {
    /// Calculates the cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Resolves wildcard implications with caching
///
/// Thread-safe; share it behind an `Arc`. The registrar clears it whenever
/// the permission snapshot is invalidated.
///
/// # Examples
///
/// ```
/// use gatehouse_permission::wildcard::{WildcardResolver, WildcardSyntax};
///
/// let resolver = WildcardResolver::new(WildcardSyntax::default());
/// assert!(resolver.implies("posts:*", "posts:create"));
/// assert!(resolver.implies_any(["comments:*", "posts:edit"], "posts:edit"));
/// ```
pub struct WildcardResolver {
    syntax: WildcardSyntax,
    /// Parsed pattern and permission strings
    parsed: DashMap<String, CacheEntry<Arc<WildcardPermission>>>,
    /// (pattern, permission) -> verdict
    verdicts: DashMap<(String, String), CacheEntry<bool>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
}

impl WildcardResolver {
    /// Creates a resolver with the default TTL
    pub fn new(syntax: WildcardSyntax) -> Self {
        Self::with_ttl(syntax, DEFAULT_CACHE_TTL)
    }

    /// Creates a resolver with a custom TTL
    pub fn with_ttl(syntax: WildcardSyntax, ttl: Duration) -> Self {
        Self {
            syntax,
            parsed: DashMap::new(),
            verdicts: DashMap::new(),
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            expirations: AtomicUsize::new(0),
        }
    }

    /// Caps each cache at `max_entries`
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Returns the grammar this resolver parses with
    pub fn syntax(&self) -> &WildcardSyntax {
        &self.syntax
    }

    /// Parses a string, reusing a cached parse when available
    pub fn parse(&self, s: &str) -> Arc<WildcardPermission> {
        if let Some(entry) = self.parsed.get(s) {
            if let Some(parsed) = entry.get() {
                return Arc::clone(parsed);
            }
        }

        let parsed = Arc::new(self.syntax.parse(s));
        Self::make_room(&self.parsed, self.max_entries);
        self.parsed
            .insert(s.to_string(), CacheEntry::new(Arc::clone(&parsed), self.ttl));
        parsed
    }

    /// Whether holding `pattern` grants `permission`, with caching
    pub fn implies(&self, pattern: &str, permission: &str) -> bool {
        let key = (pattern.to_string(), permission.to_string());

        if let Some(entry) = self.verdicts.get(&key) {
            if let Some(verdict) = entry.get() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return *verdict;
            }
            self.expirations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        let verdict = self.parse(pattern).implies(&self.parse(permission));

        Self::make_room(&self.verdicts, self.max_entries);
        self.verdicts.insert(key, CacheEntry::new(verdict, self.ttl));

        verdict
    }

    /// Sweeps expired entries from a full cache, then empties it if still full
    fn make_room<K, V>(cache: &DashMap<K, CacheEntry<V>>, max_entries: usize)
    where
        K: Eq + std::hash::Hash,
    {
        if cache.len() < max_entries {
            return;
        }
        cache.retain(|_, entry| !entry.is_expired());
        if cache.len() >= max_entries {
            cache.clear();
        }
    }

    /// Whether any of `patterns` grants `permission`
    pub fn implies_any<I, S>(&self, patterns: I, permission: &str) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .any(|pattern| self.implies(pattern.as_ref(), permission))
    }

    /// Clears parsed and verdict caches and resets statistics
    pub fn clear_cache(&self) {
        self.parsed.clear();
        self.verdicts.clear();
        self.reset_stats();
    }

    /// Removes expired entries from both caches
    pub fn cleanup_expired(&self) {
        self.parsed.retain(|_, entry| !entry.is_expired());
        self.verdicts.retain(|_, entry| !entry.is_expired());
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.verdicts.len(),
            parsed: self.parsed.len(),
        }
    }

    /// Resets cache statistics
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    /// Returns the current cache TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for WildcardResolver {
    fn default() -> Self {
        Self::new(WildcardSyntax::default())
    }
}

impl WildcardMatcher for WildcardResolver {
    fn implies(&self, pattern: &str, permission: &str) -> bool {
        WildcardResolver::implies(self, pattern, permission)
    }
}
