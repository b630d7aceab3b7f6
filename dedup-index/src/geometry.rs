//! C1 — immutable description of chapter sizes, page counts, and the
//! sparse/dense split. Grounded on `pbs-datastore::chunker`/`chunk_stat`'s
//! habit of a small, `Copy`-able configuration struct threaded everywhere
//! rather than a global.

use serde::{Deserialize, Serialize};

/// Width of a chunk name in bytes. The spec treats names as opaque fixed-width
/// identifiers; 32 bytes matches a SHA-256 digest, the width `pbs-datastore`
/// itself uses for chunk digests.
pub const CHUNK_NAME_SIZE: usize = 32;

/// Sentinel used both for "no checkpoint yet" and the sparse-cache "search
/// every cached chapter" request.
pub const NO_LAST_CHECKPOINT: u64 = u64::MAX;

/// Geometry describes a volume's chapter/page layout and the sparse/dense
/// split. It is immutable once the index is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Geometry {
    pub chapters_per_volume: u32,
    pub pages_per_chapter: u32,
    pub index_pages_per_chapter: u32,
    pub record_pages_per_chapter: u32,
    pub records_per_page: u32,
    pub bytes_per_record: u32,
    /// How many of the oldest chapters in the ring are kept sparse (hook-only).
    /// Zero means a fully dense geometry.
    pub sparse_chapters_per_volume: u32,
    /// Denominator of the hook/sample selection: a name is a sample when a
    /// hash of it is congruent to 0 modulo this value. Must be a power of two
    /// in realistic configurations, but nothing here requires it.
    pub sample_rate: u32,
}

impl Geometry {
    /// A small dense-only geometry useful for unit tests.
    pub fn dense(chapters_per_volume: u32, records_per_page: u32) -> Self {
        Geometry {
            chapters_per_volume,
            pages_per_chapter: 2,
            index_pages_per_chapter: 1,
            record_pages_per_chapter: 1,
            records_per_page,
            bytes_per_record: CHUNK_NAME_SIZE as u32,
            sparse_chapters_per_volume: 0,
            sample_rate: 32,
        }
    }

    /// A geometry with a sparse tail, useful for exercising the sparse cache.
    pub fn sparse(
        chapters_per_volume: u32,
        records_per_page: u32,
        sparse_chapters_per_volume: u32,
        sample_rate: u32,
    ) -> Self {
        Geometry {
            chapters_per_volume,
            pages_per_chapter: 2,
            index_pages_per_chapter: 1,
            record_pages_per_chapter: 1,
            records_per_page,
            bytes_per_record: CHUNK_NAME_SIZE as u32,
            sparse_chapters_per_volume,
            sample_rate,
        }
    }

    pub fn records_per_chapter(&self) -> u32 {
        self.records_per_page * self.record_pages_per_chapter
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse_chapters_per_volume > 0
    }

    pub fn dense_chapters_per_volume(&self) -> u32 {
        self.chapters_per_volume - self.sparse_chapters_per_volume
    }

    /// `physical = VCN mod chapters_per_volume`.
    pub fn map_to_physical_chapter(&self, virtual_chapter: u64) -> u32 {
        (virtual_chapter % self.chapters_per_volume as u64) as u32
    }

    /// A chapter is sparse if it lies outside the dense window trailing
    /// `newest_vcn`. `from_vcn` is accepted to mirror the spec's
    /// `is_chapter_sparse(geometry, from_vcn, newest_vcn, vcn)` signature
    /// (the replay engine always calls it with the active replay window) but
    /// the dense/sparse split only depends on distance from `newest_vcn`.
    pub fn is_chapter_sparse(&self, from_vcn: u64, newest_vcn: u64, vcn: u64) -> bool {
        debug_assert!(vcn >= from_vcn && vcn <= newest_vcn);
        if !self.is_sparse() {
            return false;
        }
        newest_vcn.saturating_sub(vcn) >= self.dense_chapters_per_volume() as u64
    }
}
