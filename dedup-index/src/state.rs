//! C7 — the index lifecycle state machine (spec section 4.5).
//!
//! Grounded on `pbs-datastore::DataStore`'s create/open/remove lifecycle
//! methods for the overall shape (a handful of free functions driving a
//! collection of owned resources through well-defined states) and on
//! `pbs-datastore/src/manifest.rs`'s `BackupManifest`, which round-trips a
//! small `serde_json` sidecar the same way `IndexStateStore` does here.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chapter_writer::ChapterWriter;
use crate::dispatcher::Dispatcher;
use crate::error::{IndexError, IndexResult};
use crate::geometry::{Geometry, NO_LAST_CHECKPOINT};
use crate::load_context::LoadContext;
use crate::replay::replay_volume;
use crate::volume::{LookupMode, Volume};
use crate::zone::IndexZone;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Create,
    Load,
    Replay,
    Rebuild,
    Ready,
    Saving,
    Freed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    Create,
    Load,
    Rebuild,
}

/// JSON sidecar recording enough lifecycle metadata to resume a clean load
/// without a full replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub oldest_vcn: u64,
    pub newest_vcn: u64,
    pub last_checkpoint: u64,
    pub has_open_chapter: bool,
}

pub struct IndexStateStore {
    path: PathBuf,
}

impl IndexStateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        IndexStateStore { path: path.as_ref().to_path_buf() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> IndexResult<PersistedState> {
        let data = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, state: &PersistedState) -> IndexResult<()> {
        let data = serde_json::to_vec_pretty(state)?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    pub fn clear(&self) -> IndexResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("state", &self.state)
            .field("zone_count", &self.zones.len())
            .field("geometry", &self.geometry)
            .field("last_checkpoint", &self.last_checkpoint)
            .field("prev_checkpoint", &self.prev_checkpoint)
            .field("has_saved_open_chapter", &self.has_saved_open_chapter)
            .finish()
    }
}

/// The running index: its zones, the owning geometry, and lifecycle bookkeeping.
pub struct Index {
    pub state: State,
    pub zones: Vec<IndexZone>,
    pub geometry: Arc<Geometry>,
    pub store: IndexStateStore,
    pub load_context: Arc<LoadContext>,
    last_checkpoint: u64,
    prev_checkpoint: u64,
    pub has_saved_open_chapter: bool,
}

impl Index {
    /// `make_index(layout, config, zone_count, load_type, load_context)`.
    pub fn make_index(
        zones: Vec<IndexZone>,
        geometry: Arc<Geometry>,
        volume: &dyn Volume,
        store: IndexStateStore,
        load_type: LoadType,
        load_context: Arc<LoadContext>,
        allow_replay: bool,
    ) -> IndexResult<Self> {
        let mut index = Index {
            state: State::Create,
            zones,
            geometry,
            store,
            load_context,
            last_checkpoint: NO_LAST_CHECKPOINT,
            prev_checkpoint: NO_LAST_CHECKPOINT,
            has_saved_open_chapter: false,
        };

        match load_type {
            LoadType::Create => {
                let _ = index.store.clear();
            }
            LoadType::Load | LoadType::Rebuild => {
                if !index.store.exists() {
                    return Err(IndexError::NoIndex);
                }
                index.state = State::Load;
                match index.load_index(volume, allow_replay) {
                    Ok(()) => {}
                    Err(IndexError::Oom) => return Err(IndexError::Oom),
                    Err(err) if load_type == LoadType::Rebuild => {
                        log::warn!("load failed ({err}), rebuilding index from volume");
                        index.state = State::Rebuild;
                        index.rebuild_index(volume)?;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        index.load_context.mark_ready();
        index.state = State::Ready;
        index.has_saved_open_chapter = load_type == LoadType::Load;
        Ok(index)
    }

    /// `load_index`: reads persisted state and, if needed, replays from the
    /// last checkpoint.
    fn load_index(&mut self, volume: &dyn Volume, allow_replay: bool) -> IndexResult<()> {
        let persisted = self.store.load()?;
        self.last_checkpoint = persisted.last_checkpoint;

        let replay_required = !persisted.has_open_chapter;
        if replay_required && !allow_replay {
            return Err(IndexError::NotSavedCleanly);
        }

        if replay_required {
            self.state = State::Replay;
            self.replay_from_checkpoint(volume, persisted.last_checkpoint)?;
        } else {
            for zone in &mut self.zones {
                zone.master_index_mut().set_window(persisted.oldest_vcn, persisted.newest_vcn);
            }
        }
        Ok(())
    }

    /// `replay_from_checkpoint(index, last_checkpoint_chapter)`.
    fn replay_from_checkpoint(&mut self, volume: &dyn Volume, last_checkpoint_chapter: u64) -> IndexResult<()> {
        let boundaries = volume.find_chapter_boundaries(LookupMode::Normal)?;

        let any_newest = self.zones.iter().map(|z| z.master_index().newest_vcn()).max().unwrap_or(0);
        if boundaries.is_empty && any_newest != 0 {
            return Err(IndexError::CorruptComponent(
                "volume reports empty but in-memory index has non-zero newest chapter".into(),
            ));
        }
        if boundaries.is_empty {
            return Ok(());
        }

        let mut oldest_vcn = boundaries.lowest_vcn;
        let newest_vcn = boundaries.highest_vcn + 1;
        let window = self.geometry.chapters_per_volume as u64;
        if newest_vcn == oldest_vcn + window {
            oldest_vcn += 1;
        }

        let first_replay = last_checkpoint_chapter.max(oldest_vcn);
        let check_for_suspend = || self.load_context.check_for_suspend();

        for zone in &mut self.zones {
            zone.master_index_mut().set_window(oldest_vcn, newest_vcn);
            replay_volume(zone.master_index_mut(), volume, &self.geometry, first_replay, &check_for_suspend)?;
        }
        Ok(())
    }

    /// `rebuild_index`: identical boundary discovery, but resets the master
    /// index and replays from the discovered `oldest_vcn` rather than the
    /// last checkpoint.
    fn rebuild_index(&mut self, volume: &dyn Volume) -> IndexResult<()> {
        let boundaries = volume.find_chapter_boundaries(LookupMode::Rebuild)?;
        if boundaries.is_empty {
            for zone in &mut self.zones {
                zone.master_index_mut().reset();
            }
            return Ok(());
        }

        let mut oldest_vcn = boundaries.lowest_vcn;
        let newest_vcn = boundaries.highest_vcn + 1;
        let window = self.geometry.chapters_per_volume as u64;
        if newest_vcn == oldest_vcn + window {
            oldest_vcn += 1;
        }

        let check_for_suspend = || self.load_context.check_for_suspend();
        for zone in &mut self.zones {
            let shard = zone.master_index_mut();
            shard.reset();
            shard.set_window(oldest_vcn, newest_vcn);
            replay_volume(shard, volume, &self.geometry, oldest_vcn, &check_for_suspend)?;
        }
        Ok(())
    }

    /// `begin_save(checkpoint, open_chapter)`.
    pub fn begin_save(&mut self, open_chapter: u64) {
        self.prev_checkpoint = self.last_checkpoint;
        self.last_checkpoint = if open_chapter == 0 { NO_LAST_CHECKPOINT } else { open_chapter - 1 };
    }

    /// `save_index`: quiesce, checkpoint, persist. Reads zone boundaries
    /// directly off `self.zones`, so this must be called while `Index` still
    /// owns its zones — before `into_dispatcher` hands them off for
    /// concurrent serving. Fails with `BadState` rather than silently
    /// persisting a bogus all-zero checkpoint if called afterward.
    pub fn save_index(&mut self, chapter_writers: &[Arc<ChapterWriter>]) -> IndexResult<()> {
        if self.zones.is_empty() {
            return Err(IndexError::BadState(
                "save_index called after zones were handed to a dispatcher".into(),
            ));
        }

        self.state = State::Saving;
        for writer in chapter_writers {
            writer.wait_for_idle_chapter_writer()?;
        }

        let newest_vcn = self.zones.iter().map(|z| z.master_index().newest_vcn()).max().unwrap_or(0);
        self.begin_save(newest_vcn);

        let oldest_vcn = self.zones.iter().map(|z| z.master_index().oldest_vcn()).min().unwrap_or(0);
        let persisted = PersistedState {
            oldest_vcn,
            newest_vcn,
            last_checkpoint: self.last_checkpoint,
            has_open_chapter: true,
        };

        if let Err(err) = self.store.save(&persisted) {
            self.last_checkpoint = self.prev_checkpoint;
            self.state = State::Ready;
            return Err(err);
        }

        self.state = State::Ready;
        Ok(())
    }

    /// Consumes the index and hands its zones to a `Dispatcher`, one worker
    /// thread per zone. After this call `save_index` can no longer run —
    /// checkpointing has to happen before this handoff, since the dispatcher
    /// has no save path of its own.
    pub fn into_dispatcher(self) -> Dispatcher {
        let sparse = self.geometry.is_sparse();
        Dispatcher::new(self.zones, sparse)
    }
}
