//! C4 — per-zone LRU cache of fully-decoded sparse chapter indexes (spec
//! section 4.2). Grounded on `pbs-tools::lru_cache::LruCache`'s `Cacher`
//! pattern (fetch-on-miss, capacity-bounded, move-to-front on hit), reworked
//! here around a `VecDeque` instead of an intrusive linked list since the
//! cache only ever holds a handful of whole chapter indexes, not a hot path
//! for millions of small entries.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::IndexResult;
use crate::geometry::{Geometry, NO_LAST_CHECKPOINT};
use crate::name::ChunkName;

/// Sentinel passed to `search` to mean "every cached chapter", matching the
/// spec's `ALL` sentinel (`MAX_U64`).
pub const ALL_CHAPTERS: u64 = NO_LAST_CHECKPOINT;

/// A fully-decoded sparse chapter index: just the set of hook names it holds.
#[derive(Debug)]
pub struct ChapterIndexData {
    pub virtual_chapter: u64,
    pub names: std::collections::HashSet<ChunkName>,
}

/// Fetch-on-miss source for sparse chapter indexes. The `Volume` implements
/// this for its sparse region.
pub trait ChapterIndexSource {
    fn load_chapter_index(&self, vcn: u64) -> IndexResult<Option<Arc<ChapterIndexData>>>;
}

pub struct SparseCache {
    capacity: usize,
    /// Front = most recently used.
    entries: VecDeque<Arc<ChapterIndexData>>,
}

impl SparseCache {
    pub fn new(capacity: usize) -> Self {
        SparseCache {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn contains(&self, vcn: u64) -> bool {
        self.entries.iter().any(|e| e.virtual_chapter == vcn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `search(zone, request, vcn_or_sentinel)`. Pass `ALL_CHAPTERS` to search
    /// every cached chapter index.
    pub fn search(&mut self, name: &ChunkName, vcn_or_sentinel: u64) -> bool {
        if vcn_or_sentinel == ALL_CHAPTERS {
            return self.entries.iter().any(|e| e.names.contains(name));
        }
        match self.position(vcn_or_sentinel) {
            Some(pos) => {
                let found = self.entries[pos].names.contains(name);
                self.touch(pos);
                found
            }
            None => false,
        }
    }

    /// `apply_barrier(zone, virtual_chapter)`. Ensures the named sparse
    /// chapter is resident, fetching it from `source` on a cache miss.
    pub fn apply_barrier(
        &mut self,
        source: &dyn ChapterIndexSource,
        _geometry: &Geometry,
        virtual_chapter: u64,
    ) -> IndexResult<()> {
        if let Some(pos) = self.position(virtual_chapter) {
            self.touch(pos);
            return Ok(());
        }
        if let Some(data) = source.load_chapter_index(virtual_chapter)? {
            self.insert(data);
        }
        Ok(())
    }

    fn position(&self, vcn: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.virtual_chapter == vcn)
    }

    fn touch(&mut self, pos: usize) {
        if pos != 0 {
            let entry = self.entries.remove(pos).unwrap();
            self.entries.push_front(entry);
        }
    }

    fn insert(&mut self, data: Arc<ChapterIndexData>) {
        self.entries.push_front(data);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn name(tag: u8) -> ChunkName {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        ChunkName::new(bytes)
    }

    fn chapter(vcn: u64, names: &[ChunkName]) -> Arc<ChapterIndexData> {
        Arc::new(ChapterIndexData {
            virtual_chapter: vcn,
            names: names.iter().copied().collect::<HashSet<_>>(),
        })
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = SparseCache::new(2);
        cache.insert(chapter(0, &[name(1)]));
        cache.insert(chapter(1, &[name(2)]));
        cache.insert(chapter(2, &[name(3)]));
        assert!(!cache.contains(0));
        assert!(cache.contains(1));
        assert!(cache.contains(2));
    }

    #[test]
    fn search_all_scans_every_cached_chapter() {
        let mut cache = SparseCache::new(4);
        cache.insert(chapter(0, &[name(1)]));
        cache.insert(chapter(1, &[name(2)]));
        assert!(cache.search(&name(1), ALL_CHAPTERS));
        assert!(!cache.search(&name(9), ALL_CHAPTERS));
    }
}
