use std::num::NonZeroUsize;

use lru::LruCache;

use super::entry::CacheEntry;
use super::key::SlotKey;

/// Recency-ordered table of every cell. Always full: unused cells are held by vacant
/// placeholders, so storing a new key means taking over the least recently used slot.
#[derive(Debug)]
pub(super) struct CacheIndex {
    lru: LruCache<SlotKey, CacheEntry>,
}

impl CacheIndex {
    pub(super) fn new(capacity: NonZeroUsize) -> Self {
        let mut lru = LruCache::new(capacity);
        for slot in 1..=capacity.get() {
            lru.push(SlotKey::Vacant(slot), CacheEntry::new(slot));
        }
        Self { lru }
    }

    /// Looks up without affecting recency.
    pub(super) fn peek(&self, key: &SlotKey) -> Option<CacheEntry> {
        self.lru.peek(key).copied()
    }

    pub(super) fn refresh(&mut self, key: &SlotKey) -> Option<CacheEntry> {
        let entry = self.lru.get_mut(key)?;
        entry.touch();
        Some(*entry)
    }

    /// Slot that the next [`replace_lru`](Self::replace_lru) will hand out.
    pub(super) fn lru_slot(&self) -> Option<usize> {
        self.lru.peek_lru().map(|(_, entry)| entry.slot)
    }

    /// Moves the least recently used slot to `key`, returning the displaced key and the
    /// refreshed entry.
    pub(super) fn replace_lru(&mut self, key: SlotKey) -> Option<(SlotKey, CacheEntry)> {
        let (displaced, mut entry) = self.lru.pop_lru()?;
        entry.touch();
        self.lru.push(key, entry);
        Some((displaced, entry))
    }

    pub(super) fn occupied(&self) -> usize {
        self.lru.iter().filter(|(key, _)| !key.is_vacant()).count()
    }

    pub(super) fn capacity(&self) -> usize {
        self.lru.cap().get()
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.lru.len()
    }
}
