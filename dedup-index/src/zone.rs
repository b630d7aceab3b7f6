//! C5 — one shard of the master index plus its open-chapter tail (spec
//! section 4.3). All mutation against this zone happens on whichever thread
//! currently holds `&mut IndexZone`; the dispatcher is responsible for
//! ensuring that is always the zone's own owning thread.

use std::sync::Arc;

use crate::chapter_writer::ChapterWriter;
use crate::error::{IndexError, IndexResult};
use crate::geometry::Geometry;
use crate::master_index::{LookupOutcome, MasterIndexShard};
use crate::name::ChunkName;
use crate::open_chapter::OpenChapter;
use crate::request::{Action, Location, Request};
use crate::sparse_cache::{ChapterIndexSource, SparseCache, ALL_CHAPTERS};
use crate::stats::Statistics;
use crate::volume::{LookupMode, Volume};

pub struct IndexZone {
    master_index: MasterIndexShard,
    open_chapter: OpenChapter,
    sparse_cache: SparseCache,
    volume: Arc<dyn Volume>,
    chapter_writer: Arc<ChapterWriter>,
    geometry: Arc<Geometry>,
    stats: Arc<Statistics>,
}

impl IndexZone {
    pub fn new(
        zone_id: u32,
        capacity: usize,
        geometry: Arc<Geometry>,
        stats: Arc<Statistics>,
        volume: Arc<dyn Volume>,
        chapter_writer: Arc<ChapterWriter>,
        sparse_cache_capacity: usize,
    ) -> Self {
        IndexZone {
            master_index: MasterIndexShard::new(zone_id, capacity, Arc::clone(&geometry), Arc::clone(&stats)),
            open_chapter: OpenChapter::new(0, geometry.records_per_chapter() as usize),
            sparse_cache: SparseCache::new(sparse_cache_capacity),
            volume,
            chapter_writer,
            geometry,
            stats,
        }
    }

    pub fn master_index(&self) -> &MasterIndexShard {
        &self.master_index
    }

    pub fn master_index_mut(&mut self) -> &mut MasterIndexShard {
        &mut self.master_index
    }

    pub fn triage(&self, name: &ChunkName) -> Option<(bool, u64)> {
        self.master_index.triage(name)
    }

    /// Ensure a sparse chapter is resident before a dependent request runs.
    pub fn apply_barrier(&mut self, virtual_chapter: u64) -> IndexResult<()> {
        let source: &dyn ChapterIndexSource = self.volume.as_ref();
        self.sparse_cache.apply_barrier(source, &self.geometry, virtual_chapter)
    }

    /// `dispatch(request)`.
    pub fn dispatch(&mut self, request: &mut Request) -> IndexResult<()> {
        match request.action {
            Action::Query | Action::Index | Action::Update => self.search(request),
            Action::Delete => self.remove(request),
        }
    }

    fn resolve_location(&mut self, name: &ChunkName, vcn: u64) -> IndexResult<Location> {
        if self.open_chapter.virtual_chapter() == vcn && self.open_chapter.contains(name) {
            return Ok(Location::InOpenChapter);
        }
        if !self.geometry.is_chapter_sparse(self.master_index.oldest_vcn(), self.master_index.newest_vcn(), vcn) {
            if self.volume.search_page_cache(name, vcn, LookupMode::Normal)? {
                return Ok(Location::InDense);
            }
            return Ok(Location::Unavailable);
        }
        if self.sparse_cache.search(name, vcn) {
            return Ok(Location::InSparse);
        }
        Ok(Location::Unavailable)
    }

    /// `search(request)` per the contract in section 4.3.
    fn search(&mut self, request: &mut Request) -> IndexResult<()> {
        let name = request.name;
        let current = self.master_index.newest_vcn();
        let outcome = self.master_index.lookup(&name);

        let (virtual_chapter, collision) = match outcome {
            LookupOutcome::Found { virtual_chapter, collision } => (virtual_chapter, collision),
            LookupOutcome::NotFound => {
                if !name.is_sample(&self.geometry) && self.geometry.is_sparse() && self.sparse_cache.search(&name, ALL_CHAPTERS) {
                    request.location = Location::InSparse;
                }
                if request.action == Action::Query && !request.update {
                    return Ok(());
                }
                return self.insert_new_record(request, current);
            }
        };

        let location = self.resolve_location(&name, virtual_chapter)?;
        // An overflow record: found-and-collision but the volume side can't
        // confirm it. Still authoritative, so it flows through the same
        // refresh/insert path below as a confirmed hit.
        let _overflow_record = collision && location == Location::Unavailable;
        request.location = location;

        if request.action == Action::Query && !request.update {
            return Ok(());
        }

        if virtual_chapter != current {
            match self.master_index.set_chapter(&name, current) {
                Ok(()) => {}
                Err(IndexError::Overflow) => {
                    log::warn!("master index overflow on chapter refresh for {}", name.to_hex());
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        } else if request.action != Action::Update {
            return Ok(());
        }

        self.insert_open_chapter_metadata(request, request.action != Action::Update);
        Ok(())
    }

    fn insert_new_record(&mut self, request: &mut Request, current: u64) -> IndexResult<()> {
        match self.master_index.put(&request.name, current) {
            Ok(()) => {}
            Err(IndexError::Overflow) => {
                log::warn!(
                    "master index overflow on insert for {}, dropping dedup hint",
                    request.name.to_hex()
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        self.insert_open_chapter_metadata(request, false);
        Ok(())
    }

    fn insert_open_chapter_metadata(&mut self, request: &Request, duplicate: bool) {
        let metadata = if duplicate {
            request.old_metadata.clone()
        } else {
            request.new_metadata.clone()
        };
        self.open_chapter.insert(request.name, metadata);
    }

    /// `remove(request)` per the contract in section 4.3.
    fn remove(&mut self, request: &mut Request) -> IndexResult<()> {
        let name = request.name;
        let outcome = self.master_index.lookup(&name);
        let (virtual_chapter, collision) = match outcome {
            LookupOutcome::Found { virtual_chapter, collision } => (virtual_chapter, collision),
            LookupOutcome::NotFound => return Ok(()),
        };

        if !collision {
            let confirmed = self.resolve_location(&name, virtual_chapter)? != Location::Unavailable;
            if !confirmed {
                return Ok(());
            }
        }

        let location = self.resolve_location(&name, virtual_chapter)?;
        request.location = location;
        self.master_index.remove(&name);
        self.stats.record_discard();

        if location == Location::InOpenChapter {
            let was_present = self.open_chapter.remove(&name);
            debug_assert!(was_present, "open-chapter accumulator out of sync with master index");
        }
        Ok(())
    }

    /// Close the open chapter, hand it to the writer, and open the next one.
    pub fn advance_chapter(&mut self) -> IndexResult<()> {
        let virtual_chapter = self.open_chapter.virtual_chapter();
        let names = self.open_chapter.names();
        self.chapter_writer.write_chapter(virtual_chapter, names)?;
        self.master_index.advance_open_chapter(virtual_chapter);
        self.open_chapter.reset(virtual_chapter + 1);
        Ok(())
    }

    pub fn should_advance(&self) -> bool {
        self.open_chapter.is_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RecordMetadata;
    use crate::volume::FileVolume;

    fn name(tag: u8) -> ChunkName {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        bytes[31] = tag;
        ChunkName::new(bytes)
    }

    fn zone(dir: &std::path::Path) -> IndexZone {
        let geometry = Arc::new(Geometry::dense(8, 4));
        let stats = Arc::new(Statistics::default());
        let volume: Arc<dyn Volume> = Arc::new(FileVolume::create(dir, *geometry).unwrap());
        let writer = Arc::new(ChapterWriter::new(Arc::clone(&volume)));
        IndexZone::new(0, 1000, geometry, stats, volume, writer, 4)
    }

    #[test]
    fn index_then_query_resolves_to_open_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let mut zone = zone(dir.path());
        let mut request = Request::index(name(1), RecordMetadata::new(vec![1, 2, 3]));
        zone.dispatch(&mut request).unwrap();
        assert_eq!(request.location, Location::Unavailable);

        let mut query = Request::query(name(1));
        zone.dispatch(&mut query).unwrap();
        assert_eq!(query.location, Location::InOpenChapter);
    }

    #[test]
    fn query_for_absent_name_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut zone = zone(dir.path());
        let mut query = Request::query(name(9));
        zone.dispatch(&mut query).unwrap();
        assert_eq!(query.location, Location::Unavailable);
        assert!(zone.master_index().is_empty());
    }

    #[test]
    fn delete_removes_from_open_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let mut zone = zone(dir.path());
        let mut index = Request::index(name(1), RecordMetadata::new(vec![9]));
        zone.dispatch(&mut index).unwrap();

        let mut delete = Request::delete(name(1));
        zone.dispatch(&mut delete).unwrap();
        assert_eq!(delete.location, Location::InOpenChapter);

        let mut query = Request::query(name(1));
        zone.dispatch(&mut query).unwrap();
        assert_eq!(query.location, Location::Unavailable);
    }
}
