//! C8 — reconstructs the in-memory master index from on-disk chapter
//! contents (spec section 4.6). Driven by the state machine on `LOAD`
//! (resume from last checkpoint) and `REBUILD` (start over).

use crate::error::{IndexError, IndexResult};
use crate::geometry::Geometry;
use crate::master_index::{LookupOutcome, MasterIndexShard};
use crate::name::ChunkName;
use crate::volume::{LookupMode, Volume};

/// Replays `[from_vcn, newest_vcn)` of `volume` into `shard`, which must
/// already have `oldest_vcn`/`newest_vcn` set by the caller (see
/// `replay_from_checkpoint`/`rebuild_index`).
pub fn replay_volume(
    shard: &mut MasterIndexShard,
    volume: &dyn Volume,
    geometry: &Geometry,
    from_vcn: u64,
    check_for_suspend: &dyn Fn() -> bool,
) -> IndexResult<()> {
    let newest_vcn = shard.newest_vcn();

    for vcn in from_vcn..newest_vcn {
        if check_for_suspend() {
            return Err(IndexError::ShuttingDown);
        }

        let will_be_sparse = geometry.is_chapter_sparse(from_vcn, newest_vcn, vcn);
        let physical = geometry.map_to_physical_chapter(vcn);
        volume.prefetch(physical, geometry.index_pages_per_chapter);

        shard.advance_open_chapter(vcn);

        rebuild_index_page_map(volume, physical, geometry)?;

        for page in 0..geometry.record_pages_per_chapter {
            let names = volume.get_record_page(physical, page, LookupMode::Rebuild)?;
            for name in names {
                replay_record(shard, volume, &name, vcn, will_be_sparse)?;
            }
        }
    }

    shard.advance_open_chapter(newest_vcn);
    Ok(())
}

/// Walks a chapter's index pages and verifies that consecutive pages'
/// list-number ranges are contiguous (`lowest[k] == highest[k-1] + 1`).
fn rebuild_index_page_map(volume: &dyn Volume, physical_chapter: u32, geometry: &Geometry) -> IndexResult<()> {
    let mut previous_highest = None;
    for page in 0..geometry.index_pages_per_chapter {
        let boundary = volume.get_index_page(physical_chapter, page, LookupMode::Rebuild)?;
        if let Some(previous) = previous_highest {
            if boundary.lowest_list_number != previous + 1 {
                return Err(IndexError::CorruptData(format!(
                    "chapter {physical_chapter} page {page}: list numbers {} and {} are not contiguous",
                    previous, boundary.lowest_list_number
                )));
            }
        }
        previous_highest = Some(boundary.highest_list_number);
    }
    Ok(())
}

fn replay_record(
    shard: &mut MasterIndexShard,
    volume: &dyn Volume,
    name: &ChunkName,
    vcn: u64,
    will_be_sparse: bool,
) -> IndexResult<()> {
    if will_be_sparse && !shard.is_sample(name) {
        return Ok(());
    }

    let update_record = match shard.lookup(name) {
        LookupOutcome::Found {
            virtual_chapter,
            collision: true,
        } => {
            if virtual_chapter == vcn {
                return Ok(());
            }
            true
        }
        LookupOutcome::Found {
            virtual_chapter,
            collision: false,
        } => {
            if virtual_chapter == vcn {
                false
            } else {
                volume.search_page_cache(name, virtual_chapter, LookupMode::Rebuild)?
            }
        }
        LookupOutcome::NotFound => false,
    };

    let result = if update_record {
        shard.set_chapter(name, vcn)
    } else {
        shard.put(name, vcn)
    };

    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_benign() => {
            log::warn!("benign replay conflict for {}: {err}", name.to_hex());
            Ok(())
        }
        Err(err) => {
            log::error!("replay failed for {}: {err}", name.to_hex());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Statistics;
    use crate::volume::FileVolume;
    use std::sync::Arc;

    fn name(tag: u8) -> ChunkName {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        bytes[31] = tag;
        ChunkName::new(bytes)
    }

    fn no_suspend() -> bool {
        false
    }

    #[test]
    fn replay_reconstructs_master_index_from_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::dense(8, 4);
        let volume = FileVolume::create(dir.path(), geometry).unwrap();
        volume.write_chapter(0, &[name(1), name(2)]).unwrap();
        volume.write_chapter(1, &[name(3)]).unwrap();

        let geometry = Arc::new(geometry);
        let mut shard = MasterIndexShard::new(0, 1000, Arc::clone(&geometry), Arc::new(Statistics::default()));
        shard.set_window(0, 2);

        replay_volume(&mut shard, &volume, &geometry, 0, &no_suspend).unwrap();

        assert!(shard.lookup(&name(1)).is_found());
        assert!(shard.lookup(&name(2)).is_found());
        assert!(shard.lookup(&name(3)).is_found());
    }

    #[test]
    fn corrupt_index_page_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::dense(8, 4);
        let volume = FileVolume::create(dir.path(), geometry).unwrap();
        volume.write_chapter(0, &[name(1)]).unwrap();
        volume.corrupt_index_page_for_test(0, 0).unwrap();

        let geometry = Arc::new(geometry);
        let mut shard = MasterIndexShard::new(0, 1000, Arc::clone(&geometry), Arc::new(Statistics::default()));
        shard.set_window(0, 1);

        let err = replay_volume(&mut shard, &volume, &geometry, 0, &no_suspend).unwrap_err();
        assert!(matches!(err, IndexError::CorruptData(_)));
    }

    #[test]
    fn suspend_request_aborts_with_shutting_down() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::dense(8, 4);
        let volume = FileVolume::create(dir.path(), geometry).unwrap();
        volume.write_chapter(0, &[name(1)]).unwrap();

        let geometry = Arc::new(geometry);
        let mut shard = MasterIndexShard::new(0, 1000, Arc::clone(&geometry), Arc::new(Statistics::default()));
        shard.set_window(0, 1);

        let err = replay_volume(&mut shard, &volume, &geometry, 0, &|| true).unwrap_err();
        assert!(matches!(err, IndexError::ShuttingDown));
    }
}
