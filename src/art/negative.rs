use std::collections::HashSet;

use parking_lot::Mutex;

use super::key::CacheKey;

/// Keys known to have no usable artwork.
///
/// Guarded by its own lock so "art absent" bookkeeping never contends with
/// the thumbnail store. Entries stay until [`NegativeCache::clear`] (or a
/// targeted [`NegativeCache::remove`]) is called explicitly.
#[derive(Default)]
pub struct NegativeCache {
    keys: Mutex<HashSet<CacheKey>>,
}

impl NegativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.keys.lock().contains(key)
    }

    /// Record `key` as having no artwork. Returns `true` if it was not
    /// already recorded.
    pub fn add(&self, key: CacheKey) -> bool {
        self.keys.lock().insert(key)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.keys.lock().remove(key)
    }

    /// Forget every known failure so those keys may be attempted again
    pub fn clear(&self) {
        let mut keys = self.keys.lock();
        if !keys.is_empty() {
            log::info!("Clearing {} entries from the missing-artwork cache", keys.len());
        }
        keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}
