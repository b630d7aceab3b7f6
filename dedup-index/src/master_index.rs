//! C3 — the sharded in-memory map from chunk name to virtual chapter (spec
//! section 4.1). Each `MasterIndexShard` backs one zone.
//!
//! The original keeps delta-compressed lists per hash bucket; the byte
//! encoding is an implementation decision the spec explicitly leaves open.
//! This crate backs a shard with a plain `HashMap` keyed by the full chunk
//! name (so two distinct names never truly alias in storage) but still
//! models the *slot* a delta-list would use via `ChunkName::coarse_slot`, so
//! the statistical collision behaviour in spec section 4.1/4.3/8 — the
//! `collisions` counter, the bounded stale-hint rate after `remove`, and the
//! spurious-parallel-record path in replay — are genuinely exercised rather
//! than parameterized away.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::{IndexError, IndexResult};
use crate::geometry::Geometry;
use crate::name::ChunkName;
use crate::stats::Statistics;

/// Number of coarse slots a shard's delta-list stand-in is divided into.
/// `2^21` matches the "≈ 1 in 2^21" stale-hint rate the spec quotes for the
/// reference parameters.
const COARSE_SLOTS: u32 = 1 << 21;

#[derive(Debug, Clone, Copy)]
pub struct MasterRecord {
    pub virtual_chapter: u64,
    pub collision: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    NotFound,
    Found {
        virtual_chapter: u64,
        collision: bool,
    },
}

impl LookupOutcome {
    pub fn is_found(self) -> bool {
        matches!(self, LookupOutcome::Found { .. })
    }
}

pub struct MasterIndexShard {
    zone_id: u32,
    capacity: usize,
    records: HashMap<ChunkName, MasterRecord>,
    /// Which name currently owns a coarse slot without being a collision record.
    slot_owner: HashMap<u32, ChunkName>,
    oldest_vcn: u64,
    newest_vcn: u64,
    geometry: Arc<Geometry>,
    stats: Arc<Statistics>,
}

impl MasterIndexShard {
    pub fn new(zone_id: u32, capacity: usize, geometry: Arc<Geometry>, stats: Arc<Statistics>) -> Self {
        MasterIndexShard {
            zone_id,
            capacity,
            records: HashMap::new(),
            slot_owner: HashMap::new(),
            oldest_vcn: 0,
            newest_vcn: 0,
            geometry,
            stats,
        }
    }

    pub fn zone_id(&self) -> u32 {
        self.zone_id
    }

    pub fn oldest_vcn(&self) -> u64 {
        self.oldest_vcn
    }

    pub fn newest_vcn(&self) -> u64 {
        self.newest_vcn
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Directly set the virtual-chapter window, bypassing the usual
    /// advance-by-one path. Used by the replay engine and by rebuild, which
    /// both need to seed `oldest`/`newest` from discovered volume boundaries
    /// rather than growing them incrementally.
    pub fn set_window(&mut self, oldest_vcn: u64, newest_vcn: u64) {
        self.oldest_vcn = oldest_vcn;
        self.newest_vcn = newest_vcn;
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.slot_owner.clear();
        self.oldest_vcn = 0;
        self.newest_vcn = 0;
    }

    /// `lookup(name)`. Reaps the record lazily if its chapter has aged out of
    /// the window — the one place this implementation mutates on what the
    /// spec calls a "pure" operation, see DESIGN.md.
    pub fn lookup(&mut self, name: &ChunkName) -> LookupOutcome {
        match self.records.get(name).copied() {
            Some(record) if record.virtual_chapter >= self.oldest_vcn => LookupOutcome::Found {
                virtual_chapter: record.virtual_chapter,
                collision: record.collision,
            },
            Some(_aged_out) => {
                self.remove_unconditionally(name);
                LookupOutcome::NotFound
            }
            None => LookupOutcome::NotFound,
        }
    }

    /// `triage(name)`: lookup without mutation. Returns `(in_sampled_chapter,
    /// virtual_chapter)` so the dispatcher can decide whether to synthesize a
    /// sparse-cache barrier.
    pub fn triage(&self, name: &ChunkName) -> Option<(bool, u64)> {
        let record = self.records.get(name)?;
        if record.virtual_chapter < self.oldest_vcn {
            return None;
        }
        let sparse = self
            .geometry
            .is_chapter_sparse(self.oldest_vcn, self.newest_vcn, record.virtual_chapter);
        Some((sparse, record.virtual_chapter))
    }

    pub fn is_sample(&self, name: &ChunkName) -> bool {
        name.is_sample(&self.geometry)
    }

    /// `set_chapter(record_handle, vcn)`. The record must already exist;
    /// calling this on a name that isn't present is a caller bug (`BadState`).
    pub fn set_chapter(&mut self, name: &ChunkName, vcn: u64) -> IndexResult<()> {
        match self.records.get_mut(name) {
            Some(record) => {
                record.virtual_chapter = vcn;
                Ok(())
            }
            None => Err(IndexError::BadState(
                "set_chapter called on a record absent from the master index".into(),
            )),
        }
    }

    /// `put(record_handle, vcn)`. Inserts a record believed absent by the
    /// caller's prior lookup. If the name is in fact already present — which
    /// genuinely happens on the replay path's "found, non-collision, same
    /// chapter" branch (spec section 4.6) — this promotes the existing
    /// record to a collision rather than failing, matching the original's
    /// deliberately-accepted spurious-collision behaviour.
    pub fn put(&mut self, name: &ChunkName, vcn: u64) -> IndexResult<()> {
        if let Some(record) = self.records.get_mut(name) {
            record.virtual_chapter = vcn;
            if !record.collision {
                record.collision = true;
                self.stats.collisions.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(());
        }

        if self.records.len() >= self.capacity {
            return Err(IndexError::Overflow);
        }

        let slot = name.coarse_slot(COARSE_SLOTS);
        let collision = match self.slot_owner.get(&slot) {
            None => {
                self.slot_owner.insert(slot, *name);
                false
            }
            Some(owner) if owner == name => false,
            Some(_other) => {
                self.stats.collisions.fetch_add(1, Ordering::Relaxed);
                true
            }
        };

        self.records.insert(
            *name,
            MasterRecord {
                virtual_chapter: vcn,
                collision,
            },
        );
        self.stats.entries_indexed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// `remove(record_handle)`.
    pub fn remove(&mut self, name: &ChunkName) {
        self.remove_unconditionally(name);
    }

    fn remove_unconditionally(&mut self, name: &ChunkName) {
        if let Some(record) = self.records.remove(name) {
            self.stats.entries_indexed.fetch_sub(1, Ordering::Relaxed);
            if !record.collision {
                let slot = name.coarse_slot(COARSE_SLOTS);
                if self.slot_owner.get(&slot) == Some(name) {
                    self.slot_owner.remove(&slot);
                }
            }
        }
    }

    /// `advance_open_chapter(vcn)`: declare `vcn` the newest chapter. Entries
    /// older than the cyclic window are reaped lazily on next touch, not here.
    pub fn advance_open_chapter(&mut self, vcn: u64) {
        self.newest_vcn = vcn;
        let window = self.geometry.chapters_per_volume as u64;
        if self.newest_vcn >= self.oldest_vcn + window {
            self.oldest_vcn = self.newest_vcn + 1 - window;
        }
    }
}
