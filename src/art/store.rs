//! Bounded in-memory store of decoded thumbnails
//!
//! Entries are evicted least-recently-used first whenever the summed byte
//! estimates exceed the configured budget.
use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::bitmap::Bitmap;
use super::key::CacheKey;

/// Default memory budget for decoded thumbnails
pub const DEFAULT_BUDGET_BYTES: usize = 100 * 1024 * 1024;

/// True if a bitmap decoded for `decoded_size` should not be shown as final
/// at `requested_size`. Sizes within 25% of each other are close enough.
pub fn is_stale(decoded_size: u32, requested_size: u32) -> bool {
    if decoded_size == 0 {
        return requested_size != 0;
    }
    let diff = decoded_size.abs_diff(requested_size) as u64;
    diff * 4 > decoded_size as u64
}

/// How well a stored bitmap matches the size it is being displayed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Decoded at a materially different size; show it, but regenerate
    Stale,
}

/// A decoded thumbnail plus the bookkeeping the store needs
#[derive(Debug, Clone)]
pub struct CacheEntry {
    bitmap: Bitmap,
    target_size: u32,
    byte_size: usize,
}

impl CacheEntry {
    pub fn new(bitmap: Bitmap, target_size: u32) -> Self {
        let byte_size = bitmap.byte_size();
        Self {
            bitmap,
            target_size,
            byte_size,
        }
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }
}

struct Slot {
    entry: CacheEntry,
    last_access: u64,
    seq: u64,
}

impl Slot {
    fn order_key(&self) -> (u64, u64) {
        (self.last_access, self.seq)
    }
}

struct StoreInner {
    slots: HashMap<CacheKey, Slot>,
    /// (last access, insertion seq) -> key, oldest first
    lru: BTreeMap<(u64, u64), CacheKey>,
    total_bytes: usize,
    budget: usize,
    /// Logical clock; every touch or insert takes the next tick
    clock: u64,
}

impl StoreInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, key: &CacheKey) {
        let now = self.tick();
        if let Some(slot) = self.slots.get_mut(key) {
            self.lru.remove(&slot.order_key());
            slot.last_access = now;
            self.lru.insert(slot.order_key(), key.clone());
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.lru.remove(&slot.order_key());
        self.total_bytes -= slot.entry.byte_size;
        Some(slot.entry)
    }

    /// Evict oldest entries until the budget holds. `keep` is never evicted,
    /// so a single oversized entry may overrun the budget on its own.
    fn evict(&mut self, keep: Option<&CacheKey>) -> Vec<CacheKey> {
        let mut victims = Vec::new();
        let mut remaining = self.total_bytes;

        for key in self.lru.values() {
            if remaining <= self.budget {
                break;
            }
            if Some(key) == keep {
                continue;
            }
            if let Some(slot) = self.slots.get(key) {
                remaining -= slot.entry.byte_size;
                victims.push(key.clone());
            }
        }

        for key in &victims {
            self.remove(key);
        }
        victims
    }
}

/// Keyed thumbnail store with a memory budget.
///
/// Every method takes the single internal lock briefly; nothing here does
/// I/O or decoding.
pub struct CacheStore {
    inner: Mutex<StoreInner>,
}

impl CacheStore {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                slots: HashMap::new(),
                lru: BTreeMap::new(),
                total_bytes: 0,
                budget,
                clock: 0,
            }),
        }
    }

    /// Bitmap for `key` if present and decoded at a size compatible with
    /// `size`. A hit refreshes the entry's last access.
    pub fn get(&self, key: &CacheKey, size: u32) -> Option<Bitmap> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get(key)?;
        if is_stale(slot.entry.target_size, size) {
            return None;
        }
        let bitmap = slot.entry.bitmap.clone();
        inner.touch(key);
        Some(bitmap)
    }

    /// Like [`CacheStore::get`], but also hands out stale bitmaps so the
    /// view can keep showing old art until a regenerated one replaces it.
    pub fn get_for_display(&self, key: &CacheKey, size: u32) -> Option<(Bitmap, Freshness)> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get(key)?;
        let freshness = if is_stale(slot.entry.target_size, size) {
            Freshness::Stale
        } else {
            Freshness::Fresh
        };
        let bitmap = slot.entry.bitmap.clone();
        inner.touch(key);
        Some((bitmap, freshness))
    }

    /// Insert or replace `key`, then evict down to the budget.
    /// Returns the keys that were evicted.
    pub fn put(&self, key: CacheKey, entry: CacheEntry) -> Vec<CacheKey> {
        let mut inner = self.inner.lock();
        inner.remove(&key);

        let now = inner.tick();
        let slot = Slot {
            entry,
            last_access: now,
            seq: now,
        };
        inner.total_bytes += slot.entry.byte_size;
        inner.lru.insert(slot.order_key(), key.clone());
        inner.slots.insert(key.clone(), slot);

        let evicted = inner.evict(Some(&key));
        if inner.total_bytes > inner.budget {
            log::debug!(
                "Thumbnail {} alone exceeds the cache budget ({} > {} bytes)",
                key,
                inner.total_bytes,
                inner.budget
            );
        }
        if !evicted.is_empty() {
            log::debug!("Evicted {} thumbnails, {} bytes in use", evicted.len(), inner.total_bytes);
        }
        evicted
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.lock().remove(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    /// Size the entry for `key` was decoded at, if any
    pub fn target_size(&self, key: &CacheKey) -> Option<u32> {
        self.inner.lock().slots.get(key).map(|s| s.entry.target_size)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.lru.clear();
        inner.total_bytes = 0;
    }

    /// Change the budget; lowering it evicts immediately
    pub fn set_budget(&self, budget: usize) -> Vec<CacheKey> {
        let mut inner = self.inner.lock();
        inner.budget = budget;
        inner.evict(None)
    }

    pub fn budget(&self) -> usize {
        self.inner.lock().budget
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An entry whose bitmap holds exactly `bytes` (a multiple of 4)
    fn entry(bytes: usize, size: u32) -> CacheEntry {
        let bitmap = Bitmap::from_rgba((bytes / 4) as u32, 1, vec![0; bytes]).unwrap();
        CacheEntry::new(bitmap, size)
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::from(name)
    }

    #[test]
    fn test_get_hit_and_miss() {
        let store = CacheStore::new(1024);
        store.put(key("a"), entry(16, 100));

        assert!(store.get(&key("a"), 100).is_some());
        assert!(store.get(&key("b"), 100).is_none());
        assert_eq!(store.total_bytes(), 16);
    }

    #[test]
    fn test_evicts_least_recently_accessed_first() {
        // Budget fits two entries
        let store = CacheStore::new(200);
        store.put(key("A"), entry(100, 100));
        store.put(key("B"), entry(100, 100));
        store.put(key("C"), entry(100, 100));

        // Inserting C pushed A out
        assert!(!store.contains(&key("A")));
        assert!(store.contains(&key("B")));
        assert!(store.contains(&key("C")));
    }

    #[test]
    fn test_hit_refreshes_access_order() {
        let store = CacheStore::new(200);
        store.put(key("A"), entry(100, 100));
        store.put(key("B"), entry(100, 100));
        assert!(store.get(&key("A"), 100).is_some());

        let evicted = store.put(key("C"), entry(100, 100));
        assert_eq!(evicted, vec![key("B")]);
        assert!(store.contains(&key("A")));
    }

    #[test]
    fn test_oversized_entry_is_kept_alone() {
        let store = CacheStore::new(100);
        store.put(key("small"), entry(40, 100));
        let evicted = store.put(key("huge"), entry(400, 100));

        assert_eq!(evicted, vec![key("small")]);
        assert!(store.contains(&key("huge")));
        assert_eq!(store.total_bytes(), 400);

        // The next insert brings the store back under budget
        store.put(key("next"), entry(40, 100));
        assert!(!store.contains(&key("huge")));
        assert_eq!(store.total_bytes(), 40);
    }

    #[test]
    fn test_budget_invariant_over_many_puts() {
        let budget = 1000;
        let store = CacheStore::new(budget);
        let sizes = [400, 120, 4, 800, 1600, 40, 40, 960, 12, 300, 300, 300, 300];

        for (i, &bytes) in sizes.iter().enumerate() {
            store.put(key(&format!("k{}", i % 5)), entry(bytes, 100));
            assert!(
                store.total_bytes() <= budget + bytes,
                "after put {} total {} exceeds budget {} + {}",
                i,
                store.total_bytes(),
                budget,
                bytes
            );
        }
    }

    #[test]
    fn test_replace_updates_accounting() {
        let store = CacheStore::new(1000);
        store.put(key("a"), entry(100, 120));
        store.put(key("a"), entry(300, 400));

        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 300);
        assert_eq!(store.target_size(&key("a")), Some(400));
    }

    #[test]
    fn test_stale_size_is_not_returned_as_final() {
        let store = CacheStore::new(1000);
        store.put(key("Y"), entry(16, 120));

        assert!(store.get(&key("Y"), 400).is_none());
        assert!(store.get(&key("Y"), 125).is_some());

        let (_, freshness) = store.get_for_display(&key("Y"), 400).unwrap();
        assert_eq!(freshness, Freshness::Stale);
    }

    #[test]
    fn test_lowering_budget_evicts_immediately() {
        let store = CacheStore::new(1000);
        for name in ["a", "b", "c", "d"] {
            store.put(key(name), entry(200, 100));
        }

        let evicted = store.set_budget(400);
        assert_eq!(evicted, vec![key("a"), key("b")]);
        assert_eq!(store.total_bytes(), 400);
        assert_eq!(store.budget(), 400);
    }

    #[test]
    fn test_clear_resets_accounting() {
        let store = CacheStore::new(1000);
        store.put(key("a"), entry(100, 100));
        store.put(key("b"), entry(100, 100));
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_staleness_rule() {
        assert!(!is_stale(120, 120));
        assert!(!is_stale(120, 140));
        assert!(is_stale(120, 400));
        assert!(is_stale(400, 120));
        assert!(is_stale(0, 10));
    }
}
