//! A sharded, chaptered deduplication index: given a fixed-width chunk name,
//! reports whether an equivalent chunk has been seen before and, if so,
//! which virtual chapter it last appeared in.
//!
//! The index is the lookup layer of a larger deduplicating block store; the
//! block store itself (data placement, compression, I/O scheduling) is an
//! external collaborator. This crate owns: the zoned in-memory master index,
//! the circular chaptered volume's aging contract, the request dispatcher
//! that serializes operations through per-zone executors, and the
//! load/save/replay/rebuild lifecycle that reconstructs the index from
//! persisted volume contents.

mod chapter_writer;
mod dispatcher;
mod error;
mod geometry;
mod load_context;
mod master_index;
mod name;
mod open_chapter;
mod replay;
mod sparse_cache;
mod stats;
mod state;
mod volume;
mod zone;

pub use chapter_writer::ChapterWriter;
pub use dispatcher::Dispatcher;
pub use error::{IndexError, IndexResult};
pub use geometry::{Geometry, CHUNK_NAME_SIZE, NO_LAST_CHECKPOINT};
pub use load_context::{LoadContext, LoadStatus};
pub use master_index::{LookupOutcome, MasterIndexShard, MasterRecord};
pub use name::ChunkName;
pub use open_chapter::OpenChapter;
pub use request::{Action, Location, RecordMetadata, Request};
pub use sparse_cache::{ChapterIndexData, ChapterIndexSource, SparseCache, ALL_CHAPTERS};
pub use state::{Index, IndexStateStore, LoadType, PersistedState, State};
pub use stats::{Statistics, StatisticsSnapshot};
pub use volume::{ChapterBoundaries, FileVolume, IndexPageBoundary, LookupMode, Volume};
pub use zone::IndexZone;

mod request;

use std::path::Path;
use std::sync::Arc;

/// Builds `zone_count` zones sharing one `FileVolume` at `volume_dir` and
/// runs them through `Index::make_index` (create/load/rebuild per
/// `load_type`).
///
/// The returned `Index` still owns its zones: a caller that wants a
/// just-brought-up checkpoint on disk before serving any traffic can call
/// `index.save_index(&chapter_writers)` using the writers returned alongside.
/// Only once the caller is done with that direct-ownership window should it
/// call `index.into_dispatcher()` to hand the zones to their own worker
/// threads and start serving requests — `save_index` has no path through the
/// dispatcher, so it cannot be called again after that conversion.
///
/// This is the call site `anyhow::Context` is meant for: each step below is
/// typed `IndexError` in isolation, but the caller only needs to know which
/// *stage* of bring-up failed.
pub fn open_index<P: AsRef<Path>>(
    volume_dir: P,
    state_path: P,
    geometry: Geometry,
    zone_count: u32,
    shard_capacity: usize,
    sparse_cache_capacity: usize,
    load_type: LoadType,
    allow_replay: bool,
) -> anyhow::Result<(Index, Vec<Arc<ChapterWriter>>)> {
    use anyhow::Context;

    let geometry = Arc::new(geometry);
    let volume: Arc<dyn Volume> =
        Arc::new(FileVolume::create(volume_dir, *geometry).context("failed to open the backing volume")?);
    let store = IndexStateStore::new(state_path);
    let load_context = Arc::new(LoadContext::new());

    let mut chapter_writers = Vec::with_capacity(zone_count as usize);
    let zones: Vec<IndexZone> = (0..zone_count)
        .map(|id| {
            let stats = Arc::new(Statistics::default());
            let writer = Arc::new(ChapterWriter::new(Arc::clone(&volume)));
            chapter_writers.push(Arc::clone(&writer));
            IndexZone::new(
                id,
                shard_capacity,
                Arc::clone(&geometry),
                stats,
                Arc::clone(&volume),
                writer,
                sparse_cache_capacity,
            )
        })
        .collect();

    let index = Index::make_index(zones, Arc::clone(&geometry), volume.as_ref(), store, load_type, load_context, allow_replay)
        .with_context(|| format!("failed to bring index up under load type {load_type:?}"))?;

    Ok((index, chapter_writers))
}
