//! Bounded, concurrent string interning for repeated tag payloads.
//!
//! Tag payloads repeat heavily (`type:user`, `session:active`, namespace
//! prefixes), so the engine keeps one canonical `Arc<str>` per distinct
//! payload in a sharded, LRU-evicting pool with byte-level accounting.
//! Entries that prove hot (access count above the frequency floor) are
//! promoted back to MRU instead of evicted.

use lru::LruCache;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Fixed per-entry overhead charged on top of the string bytes (map node,
/// Arc header, recency links).
const ENTRY_OVERHEAD_BYTES: usize = 96;

/// Number of shards; contention spreads across them by payload hash.
const SHARD_COUNT: usize = 16;

/// Configuration for an [`Interner`].
#[derive(Debug, Clone)]
pub struct InternerConfig {
    /// Maximum number of interned strings across all shards.
    pub max_entries: usize,

    /// Memory budget in bytes across all shards.
    pub memory_limit_bytes: usize,

    /// Entries accessed more than this many times are promoted back to MRU
    /// instead of evicted.
    pub frequency_floor: u64,
}

impl Default for InternerConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            memory_limit_bytes: 100 * 1024 * 1024,
            frequency_floor: 100,
        }
    }
}

/// Read-only snapshot of interner counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InternerStats {
    /// Lookups that found an existing canonical string.
    pub hits: u64,
    /// Lookups that inserted (or bypassed under pressure).
    pub misses: u64,
    /// Entries removed to satisfy the bounds.
    pub evictions: u64,
    /// Strings currently interned.
    pub entries: usize,
    /// Bytes currently accounted, including per-entry overhead.
    pub memory_bytes: usize,
}

struct Entry {
    value: Arc<str>,
    accesses: AtomicU64,
}

struct Shard {
    map: RwLock<LruCache<Box<str>, Entry>>,
    bytes: AtomicUsize,
}

impl Shard {
    // Unbounded map: the bounds are enforced by evict_over_budget, which
    // is the only place allowed to evict (it honors the frequency floor).
    fn new() -> Self {
        Self {
            map: RwLock::new(LruCache::unbounded()),
            bytes: AtomicUsize::new(0),
        }
    }
}

/// Sharded, bounded string intern pool.
///
/// Hits take a shard read lock only; the write lock is touched on first
/// insertion and during eviction. Construction-time injection keeps tests
/// isolated, and [`Interner::global`] offers the process-wide instance the
/// entity model uses by default.
pub struct Interner {
    shards: Vec<Shard>,
    config: InternerConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Interner {
    /// Creates an interner with the given bounds.
    pub fn new(config: InternerConfig) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Shard::new()).collect();
        Self {
            shards,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the process-wide default interner.
    pub fn global() -> &'static Interner {
        static GLOBAL: OnceLock<Interner> = OnceLock::new();
        GLOBAL.get_or_init(|| Interner::new(InternerConfig::default()))
    }

    /// Returns the canonical `Arc<str>` for the given string.
    ///
    /// Equal inputs return clones of the same allocation until the entry is
    /// evicted. Oversized strings bypass the pool and are handed back
    /// uncached; correctness is unaffected, only sharing is lost.
    pub fn intern(&self, s: &str) -> Arc<str> {
        let shard = &self.shards[self.shard_for(s)];

        {
            let map = shard.map.read();
            if let Some(entry) = map.peek(s) {
                entry.accesses.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(&entry.value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        let cost = Self::entry_cost(s);
        if cost > self.memory_budget_per_shard() {
            return Arc::from(s);
        }

        let value: Arc<str> = Arc::from(s);
        let mut map = shard.map.write();

        // A racing writer may have inserted between the read and write locks.
        if let Some(entry) = map.peek(s) {
            entry.accesses.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(&entry.value);
        }

        shard.bytes.fetch_add(cost, Ordering::Relaxed);
        map.push(
            Box::from(s),
            Entry {
                value: Arc::clone(&value),
                accesses: AtomicU64::new(1),
            },
        );
        self.evict_over_budget(shard, &mut map);

        value
    }

    /// Evicts LRU entries in all shards until both bounds hold again.
    ///
    /// Invoked by the maintenance scheduler; normal inserts keep the bounds
    /// incrementally, so this only does work after a configuration shrink or
    /// a burst of bypassed accounting.
    pub fn trim(&self) {
        for shard in &self.shards {
            let mut map = shard.map.write();
            self.evict_over_budget(shard, &mut map);
        }
    }

    /// Empties the pool and resets byte accounting. Counters are kept.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut map = shard.map.write();
            map.clear();
            shard.bytes.store(0, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of the interner counters.
    pub fn stats(&self) -> InternerStats {
        let mut entries = 0;
        let mut memory = 0;
        for shard in &self.shards {
            entries += shard.map.read().len();
            memory += shard.bytes.load(Ordering::Relaxed);
        }
        InternerStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
            memory_bytes: memory,
        }
    }

    fn shard_for(&self, s: &str) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        s.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    fn entry_cost(s: &str) -> usize {
        // Key copy + Arc'd value + bookkeeping.
        s.len() * 2 + ENTRY_OVERHEAD_BYTES
    }

    fn memory_budget_per_shard(&self) -> usize {
        (self.config.memory_limit_bytes / SHARD_COUNT).max(ENTRY_OVERHEAD_BYTES)
    }

    fn entry_budget_per_shard(&self) -> usize {
        self.config.max_entries.div_ceil(SHARD_COUNT).max(1)
    }

    fn evict_over_budget(&self, shard: &Shard, map: &mut LruCache<Box<str>, Entry>) {
        let byte_budget = self.memory_budget_per_shard();
        let entry_budget = self.entry_budget_per_shard();

        // Entries above the frequency floor are promoted, not evicted, so
        // the pass budget keeps an all-hot shard from spinning here.
        let mut passes = map.len();
        while passes > 0
            && (map.len() > entry_budget || shard.bytes.load(Ordering::Relaxed) > byte_budget)
        {
            passes -= 1;
            let Some((key, entry)) = map.pop_lru() else {
                break;
            };

            if entry.accesses.load(Ordering::Relaxed) > self.config.frequency_floor {
                map.push(key, entry);
                continue;
            }

            shard
                .bytes
                .fetch_sub(Self::entry_cost(&key).min(shard.bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new(InternerConfig::default())
    }
}
