//! Directory IV cache: bounded LRU from directory path to its 16-byte IV.
//!
//! Every encrypted path component needs the IV of its parent directory.
//! Without a cache each path operation re-reads `gocryptfs.diriv` for every
//! directory on the way down. The filename layer owns invalidation: it must
//! call `remove` when a directory is renamed or deleted.
//!
//! Layout: nodes live in an arena (`Vec<Slot>`) and are chained MRU → LRU by
//! index. A `HashMap` maps each normalized path to its slot. Promote, insert,
//! and evict are O(1). One mutex covers the whole structure; nothing under
//! it touches the filesystem.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;
use veilfs_core::DirIv;

/// Default number of resident directory IVs
pub const DIR_IV_CACHE_ENTRIES: usize = 100;

/// A hit-ratio report is logged every this many lookups.
const REPORT_INTERVAL: u64 = 1024;

const NIL: usize = usize::MAX;

static GLOBAL: OnceLock<DirIvCache> = OnceLock::new();

/// Counter snapshot for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub resident: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, in `0.0..=1.0`.
    pub fn hit_ratio(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

struct Slot {
    key: String,
    iv: DirIv,
    prev: usize,
    next: usize,
}

struct Inner {
    index: HashMap<String, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    /// Most recently used
    head: usize,
    /// Least recently used
    tail: usize,
    lookups: u64,
    hits: u64,
}

impl Inner {
    fn with_capacity(capacity: usize) -> Self {
        Inner {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            lookups: 0,
            hits: 0,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            NIL => self.head = next,
            p => self.slots[p].next = next,
        }
        match next {
            NIL => self.tail = prev,
            n => self.slots[n].prev = prev,
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        match self.head {
            NIL => self.tail = idx,
            h => self.slots[h].prev = idx,
        }
        self.head = idx;
    }

    fn promote(&mut self, idx: usize) {
        if self.head != idx {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    /// Drop the LRU node from both the ordering and the index and recycle
    /// its slot.
    fn evict_lru(&mut self) {
        let idx = self.tail;
        if idx == NIL {
            return;
        }
        self.unlink(idx);
        let key = std::mem::take(&mut self.slots[idx].key);
        self.index.remove(&key);
        self.free.push(idx);
    }

    fn alloc(&mut self, key: String, iv: DirIv) -> usize {
        let slot = Slot {
            key,
            iv,
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.unlink(idx);
        self.slots[idx].key.clear();
        self.free.push(idx);
    }
}

/// Thread-safe, capacity-bounded LRU cache of directory IVs.
pub struct DirIvCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl DirIvCache {
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DirIvCache {
            inner: Mutex::new(Inner::with_capacity(capacity)),
            capacity,
        }
    }

    /// The process-wide cache, created with the default capacity on first use.
    pub fn global() -> &'static DirIvCache {
        GLOBAL.get_or_init(|| DirIvCache::new(DIR_IV_CACHE_ENTRIES))
    }

    /// Initialize the process-wide cache with a custom capacity. Returns
    /// false if it already exists; the existing cache is kept.
    pub fn init_global(capacity: usize) -> bool {
        GLOBAL.set(DirIvCache::new(capacity)).is_ok()
    }

    // Operations never fail, so a panic elsewhere must not poison the cache.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the IV of `path`, promoting it to most recently used on a hit.
    pub fn lookup(&self, path: &str) -> Option<DirIv> {
        let key = normalize_key(path);

        let (found, report) = {
            let mut inner = self.lock();
            inner.lookups += 1;
            let found = match inner.index.get(&key).copied() {
                Some(idx) => {
                    inner.promote(idx);
                    inner.hits += 1;
                    Some(inner.slots[idx].iv)
                }
                None => None,
            };
            let report =
                (inner.lookups % REPORT_INTERVAL == 0).then_some((inner.lookups, inner.hits));
            (found, report)
        };

        if let Some((lookups, hits)) = report {
            debug!(
                lookups,
                hits,
                misses = lookups - hits,
                hit_ratio = format_args!("{:.2}%", hits as f64 / lookups as f64 * 100.0),
                "dir IV cache stats"
            );
        }
        found
    }

    /// Insert or overwrite the IV of `path` as most recently used, evicting
    /// the least recently used entry if the cache is full.
    pub fn store(&self, path: &str, iv: &DirIv) {
        let key = normalize_key(path);
        let mut inner = self.lock();

        if let Some(idx) = inner.index.get(&key).copied() {
            inner.slots[idx].iv = *iv;
            inner.promote(idx);
            return;
        }

        if inner.index.len() >= self.capacity {
            inner.evict_lru();
        }
        let idx = inner.alloc(key.clone(), *iv);
        inner.push_front(idx);
        inner.index.insert(key, idx);
    }

    /// Forget `path`. No-op if it is not cached.
    pub fn remove(&self, path: &str) {
        let key = normalize_key(path);
        let mut inner = self.lock();
        if let Some(idx) = inner.index.remove(&key) {
            inner.release(idx);
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let (lookups, hits) = (inner.lookups, inner.hits);
        *inner = Inner::with_capacity(self.capacity);
        inner.lookups = lookups;
        inner.hits = hits;
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            lookups: inner.lookups,
            hits: inner.hits,
            misses: inner.lookups - inner.hits,
            resident: inner.index.len(),
            capacity: self.capacity,
        }
    }
}

impl Default for DirIvCache {
    fn default() -> Self {
        DirIvCache::new(DIR_IV_CACHE_ENTRIES)
    }
}

/// End `path` with exactly one platform separator, so `a/b` and `a/b/` share
/// one cache key. The empty path is left alone.
pub fn normalize_key(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut key = path.trim_end_matches(std::path::is_separator).to_string();
    key.push(std::path::MAIN_SEPARATOR);
    key
}

#[cfg(test)]
impl DirIvCache {
    /// Walk both directions of the ordering and cross-check the index.
    fn assert_consistent(&self) {
        let inner = self.lock();
        let mut forward = Vec::new();
        let mut idx = inner.head;
        while idx != NIL {
            forward.push(idx);
            idx = inner.slots[idx].next;
        }
        let mut backward = Vec::new();
        let mut idx = inner.tail;
        while idx != NIL {
            backward.push(idx);
            idx = inner.slots[idx].prev;
        }
        backward.reverse();

        assert_eq!(forward, backward, "ordering links disagree");
        assert_eq!(forward.len(), inner.index.len(), "index/ordering size mismatch");
        assert_eq!(
            forward.len(),
            inner.slots.len() - inner.free.len(),
            "resident node count mismatch"
        );
        assert!(forward.len() <= self.capacity, "over capacity");
        for idx in forward {
            let key = &inner.slots[idx].key;
            assert_eq!(inner.index.get(key), Some(&idx), "index points elsewhere");
        }
    }

    /// Keys from most to least recently used.
    fn keys_mru(&self) -> Vec<String> {
        let inner = self.lock();
        let mut out = Vec::new();
        let mut idx = inner.head;
        while idx != NIL {
            out.push(inner.slots[idx].key.clone());
            idx = inner.slots[idx].next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::MAIN_SEPARATOR;

    fn iv(n: u8) -> DirIv {
        [n; 16]
    }

    fn key(p: &str) -> String {
        format!("{p}{MAIN_SEPARATOR}")
    }

    #[test]
    fn store_then_lookup() {
        let cache = DirIvCache::new(4);
        cache.store("docs", &iv(1));
        assert_eq!(cache.lookup("docs"), Some(iv(1)));
        cache.assert_consistent();
    }

    #[test]
    fn miss_returns_none() {
        let cache = DirIvCache::new(4);
        assert_eq!(cache.lookup("nowhere"), None);
        let stats = cache.stats();
        assert_eq!(stats.lookups, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn trailing_separator_shares_key() {
        let cache = DirIvCache::new(4);
        cache.store("a/b", &iv(7));
        assert_eq!(cache.lookup(&key("a/b")), Some(iv(7)));
        cache.store(&key("a/b"), &iv(8));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("a/b"), Some(iv(8)));
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["", "a", "a/b", "/", "/x/y/", "a//", "dir\\sub"] {
            let once = normalize_key(p);
            assert_eq!(normalize_key(&once), once, "path {p:?}");
        }
        assert_eq!(normalize_key(""), "");
        assert_eq!(normalize_key("a"), key("a"));
        assert_eq!(normalize_key("a//"), key("a"));
    }

    #[test]
    fn remove_then_lookup_misses() {
        let cache = DirIvCache::new(4);
        cache.store("x", &iv(1));
        cache.remove("x/");
        assert_eq!(cache.lookup("x"), None);
        assert!(cache.is_empty());
        cache.assert_consistent();
    }

    #[test]
    fn remove_absent_is_noop() {
        let cache = DirIvCache::new(4);
        cache.store("x", &iv(1));
        cache.remove("y");
        assert_eq!(cache.len(), 1);
        cache.assert_consistent();
    }

    #[test]
    fn lookup_promotes_before_eviction() {
        let cache = DirIvCache::new(2);
        cache.store("A", &iv(1));
        cache.store("B", &iv(2));
        assert_eq!(cache.lookup("A"), Some(iv(1)));
        cache.store("C", &iv(3));

        assert_eq!(cache.lookup("B"), None);
        assert_eq!(cache.lookup("A"), Some(iv(1)));
        assert_eq!(cache.lookup("C"), Some(iv(3)));
        cache.assert_consistent();
    }

    #[test]
    fn eviction_follows_recency() {
        let cache = DirIvCache::new(3);
        for (i, p) in ["a", "b", "c"].iter().enumerate() {
            cache.store(p, &iv(i as u8));
        }
        assert_eq!(cache.keys_mru(), [key("c"), key("b"), key("a")]);

        cache.lookup("a");
        assert_eq!(cache.keys_mru(), [key("a"), key("c"), key("b")]);

        cache.store("d", &iv(9));
        assert_eq!(cache.keys_mru(), [key("d"), key("a"), key("c")]);
        cache.assert_consistent();
    }

    #[test]
    fn overwrite_promotes_without_evicting() {
        let cache = DirIvCache::new(2);
        cache.store("a", &iv(1));
        cache.store("b", &iv(2));
        cache.store("a", &iv(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys_mru(), [key("a"), key("b")]);
        assert_eq!(cache.lookup("a"), Some(iv(3)));
        assert_eq!(cache.lookup("b"), Some(iv(2)));
        cache.assert_consistent();
    }

    #[test]
    fn evicted_path_comes_back_fresh() {
        let cache = DirIvCache::new(1);
        cache.store("a", &iv(1));
        cache.store("b", &iv(2));
        assert_eq!(cache.lookup("a"), None);

        cache.store("a", &iv(5));
        assert_eq!(cache.lookup("a"), Some(iv(5)));
        assert_eq!(cache.lookup("b"), None);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = DirIvCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.store("a", &iv(1));
        assert_eq!(cache.lookup("a"), Some(iv(1)));
    }

    #[test]
    fn slots_are_recycled() {
        let cache = DirIvCache::new(2);
        for i in 0..100u8 {
            cache.store(&format!("d{i}"), &iv(i));
        }
        assert_eq!(cache.lock().slots.len(), 2);
        cache.assert_consistent();
    }

    #[test]
    fn clear_keeps_counters() {
        let cache = DirIvCache::new(4);
        cache.store("a", &iv(1));
        cache.lookup("a");
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.lookup("a"), None);
        cache.assert_consistent();
    }

    #[test]
    fn hit_ratio() {
        let cache = DirIvCache::new(4);
        cache.store("a", &iv(1));
        cache.lookup("a");
        cache.lookup("a");
        cache.lookup("a");
        cache.lookup("b");
        let stats = cache.stats();
        assert_eq!(stats.resident, 1);
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn report_interval_does_not_disturb_lookups() {
        let cache = DirIvCache::new(4);
        cache.store("a", &iv(1));
        for _ in 0..(REPORT_INTERVAL * 2 + 1) {
            assert_eq!(cache.lookup("a"), Some(iv(1)));
        }
        assert_eq!(cache.stats().lookups, REPORT_INTERVAL * 2 + 1);
    }

    #[test]
    fn global_is_shared() {
        let a = DirIvCache::global() as *const DirIvCache;
        let b = DirIvCache::global() as *const DirIvCache;
        assert_eq!(a, b);
        assert!(!DirIvCache::init_global(5));
    }

    #[test]
    fn concurrent_mixed_operations_keep_invariants() {
        use rand::Rng;

        let cache = DirIvCache::new(16);
        std::thread::scope(|s| {
            for t in 0..8u8 {
                let cache = &cache;
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..2000 {
                        let path = format!("dir{}", rng.gen_range(0..40));
                        match rng.gen_range(0..3) {
                            0 => {
                                cache.lookup(&path);
                            }
                            1 => cache.store(&path, &iv(t)),
                            _ => cache.remove(&path),
                        }
                    }
                });
            }
        });
        cache.assert_consistent();
        assert!(cache.len() <= 16);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let cache = DirIvCache::new(4);
        cache.store("a", &iv(1));
        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = cache.inner.lock().unwrap();
                panic!("poison the cache lock");
            })
            .join()
        });
        assert!(cache.inner.is_poisoned());
        assert_eq!(cache.lookup("a"), Some(iv(1)));
    }
}

#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Lookup(u8),
        Store(u8, u8),
        Remove(u8),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12).prop_map(Op::Lookup),
            (0u8..12, any::<u8>()).prop_map(|(p, v)| Op::Store(p, v)),
            (0u8..12).prop_map(Op::Remove),
        ]
    }

    /// Reference LRU: Vec ordered MRU first.
    fn model_apply(model: &mut Vec<(String, DirIv)>, cap: usize, op: &Op) -> Option<DirIv> {
        match op {
            Op::Lookup(p) => {
                let k = normalize_key(&format!("p{p}"));
                let pos = model.iter().position(|(mk, _)| *mk == k)?;
                let entry = model.remove(pos);
                let iv = entry.1;
                model.insert(0, entry);
                Some(iv)
            }
            Op::Store(p, v) => {
                let k = normalize_key(&format!("p{p}"));
                if let Some(pos) = model.iter().position(|(mk, _)| *mk == k) {
                    model.remove(pos);
                } else if model.len() >= cap {
                    model.pop();
                }
                model.insert(0, (k, [*v; 16]));
                None
            }
            Op::Remove(p) => {
                let k = normalize_key(&format!("p{p}"));
                model.retain(|(mk, _)| *mk != k);
                None
            }
        }
    }

    proptest! {
        #[test]
        fn matches_reference_lru(cap in 1usize..6, ops in prop::collection::vec(arb_op(), 1..200)) {
            let cache = DirIvCache::new(cap);
            let mut model = Vec::new();
            for op in &ops {
                let expected = model_apply(&mut model, cap, op);
                match op {
                    Op::Lookup(p) => prop_assert_eq!(cache.lookup(&format!("p{p}")), expected),
                    Op::Store(p, v) => cache.store(&format!("p{p}"), &[*v; 16]),
                    Op::Remove(p) => cache.remove(&format!("p{p}")),
                }
                prop_assert!(cache.len() <= cap);
            }
            let keys: Vec<String> = model.iter().map(|(k, _)| k.clone()).collect();
            prop_assert_eq!(cache.keys_mru(), keys);
            cache.assert_consistent();
        }

        #[test]
        fn normalize_idempotent(path in "[a-z/]{1,24}") {
            let once = normalize_key(&path);
            prop_assert_eq!(normalize_key(&once), once.clone());
            prop_assert_eq!(normalize_key(&format!("{path}/")), once);
        }

        #[test]
        fn store_then_lookup_returns_value(path in "[a-z]{1,12}(/[a-z]{1,12}){0,3}", v in any::<[u8; 16]>()) {
            let cache = DirIvCache::new(8);
            cache.store(&path, &v);
            prop_assert_eq!(cache.lookup(&path), Some(v));
        }
    }
}
