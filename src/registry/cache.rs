//! Per-context lookup cache.
//!
//! A small ring of `(previous, next)` pairs recorded by recent lookups. An
//! entry only says where a scan may start; the forest re-checks it before
//! use and every mutation clears it.

use super::subtree::Handle;

/// Capacity of each ring.
pub const MAX_LOOKUP_CACHE_SIZE: usize = 32;

/// Size used when a negative size is requested.
pub const DEFAULT_LOOKUP_CACHE_SIZE: usize = 8;

/// Clamp a requested cache size: negative means the default, zero
/// disables caching, anything else is capped at the ring capacity.
pub fn clamp_size(requested: i32) -> usize {
    match usize::try_from(requested) {
        Ok(size) => size.min(MAX_LOOKUP_CACHE_SIZE),
        Err(_) => DEFAULT_LOOKUP_CACHE_SIZE,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheEntry {
    pub(crate) previous: Handle,
    pub(crate) next: Handle,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LookupCache {
    entries: [Option<CacheEntry>; MAX_LOOKUP_CACHE_SIZE],
    count: usize,
    pos: usize,
}

impl LookupCache {
    /// Live entries within the first `size` slots, with their slot index.
    pub(crate) fn entries(&self, size: usize) -> impl Iterator<Item = (usize, CacheEntry)> + '_ {
        self.entries
            .iter()
            .take(self.count.min(size))
            .enumerate()
            .filter_map(|(slot, entry)| entry.map(|e| (slot, e)))
    }

    pub(crate) fn replace(&mut self, slot: usize, entry: CacheEntry) {
        if let Some(target) = self.entries.get_mut(slot) {
            *target = Some(entry);
        }
    }

    /// Record an entry, overwriting the oldest once `size` slots are used.
    pub(crate) fn add(&mut self, entry: CacheEntry, size: usize) {
        if size == 0 {
            return;
        }
        let size = size.min(MAX_LOOKUP_CACHE_SIZE);
        if self.pos >= size {
            self.pos = 0;
        }
        self.entries[self.pos] = Some(entry);
        self.pos += 1;
        if self.count < size {
            self.count += 1;
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(previous: usize, next: usize) -> CacheEntry {
        CacheEntry {
            previous: Handle(previous),
            next: Handle(next),
        }
    }

    #[test]
    fn size_clamping() {
        assert_eq!(clamp_size(-1), DEFAULT_LOOKUP_CACHE_SIZE);
        assert_eq!(clamp_size(0), 0);
        assert_eq!(clamp_size(5), 5);
        assert_eq!(clamp_size(1000), MAX_LOOKUP_CACHE_SIZE);
    }

    #[test]
    fn ring_wraps_at_size() {
        let mut cache = LookupCache::default();
        for i in 0..5 {
            cache.add(entry(i, i + 1), 3);
        }
        assert_eq!(cache.len(), 3);
        let previous: Vec<_> = cache.entries(3).map(|(_, e)| e.previous.0).collect();
        // slots 0 and 1 were overwritten by the 4th and 5th adds
        assert_eq!(previous, vec![3, 4, 2]);
    }

    #[test]
    fn zero_size_records_nothing() {
        let mut cache = LookupCache::default();
        cache.add(entry(0, 1), 0);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.entries(8).count(), 0);
    }

    #[test]
    fn clear_empties() {
        let mut cache = LookupCache::default();
        cache.add(entry(0, 1), 8);
        cache.replace(0, entry(2, 3));
        assert_eq!(cache.entries(8).next().map(|(_, e)| e), Some(entry(2, 3)));
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
