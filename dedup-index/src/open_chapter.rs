//! The write-only in-memory accumulator for the current `newest_vcn` (spec
//! section 3, "Open chapter"). Grounded on `pbs-datastore::dynamic_index`'s
//! in-memory staging of entries ahead of a flush.

use std::collections::HashMap;

use crate::name::ChunkName;
use crate::request::RecordMetadata;

pub struct OpenChapter {
    virtual_chapter: u64,
    capacity: usize,
    entries: HashMap<ChunkName, RecordMetadata>,
}

impl OpenChapter {
    pub fn new(virtual_chapter: u64, capacity: usize) -> Self {
        OpenChapter {
            virtual_chapter,
            capacity,
            entries: HashMap::new(),
        }
    }

    pub fn virtual_chapter(&self) -> u64 {
        self.virtual_chapter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, name: &ChunkName) -> bool {
        self.entries.contains_key(name)
    }

    pub fn insert(&mut self, name: ChunkName, metadata: RecordMetadata) {
        self.entries.insert(name, metadata);
    }

    /// Explicit removal (spec 4.1's `remove`, used by `IndexZone::remove`'s
    /// open-chapter branch). Returns whether the name had been present.
    pub fn remove(&mut self, name: &ChunkName) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Snapshot the accumulated names, in insertion-agnostic order, for
    /// handoff to the chapter writer.
    pub fn names(&self) -> Vec<ChunkName> {
        self.entries.keys().copied().collect()
    }

    /// Reset for a freshly-opened chapter.
    pub fn reset(&mut self, virtual_chapter: u64) {
        self.virtual_chapter = virtual_chapter;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(tag: u8) -> ChunkName {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        ChunkName::new(bytes)
    }

    #[test]
    fn fills_up_and_resets() {
        let mut chapter = OpenChapter::new(0, 2);
        chapter.insert(name(1), RecordMetadata::default());
        assert!(!chapter.is_full());
        chapter.insert(name(2), RecordMetadata::default());
        assert!(chapter.is_full());
        chapter.reset(1);
        assert!(chapter.is_empty());
        assert_eq!(chapter.virtual_chapter(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let mut chapter = OpenChapter::new(0, 4);
        chapter.insert(name(1), RecordMetadata::default());
        assert!(chapter.remove(&name(1)));
        assert!(!chapter.remove(&name(1)));
    }
}
