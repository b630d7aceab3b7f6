//! The chapter writer: hands a filled open chapter off to its own thread so
//! the zone's owning executor can start accepting requests against the new
//! open chapter immediately (spec section 4.4, "Chapter writer").
//!
//! Grounded on `tools::parallel_handler::ParallelHandler`: a single worker
//! thread fed over a bounded `crossbeam_channel`, with the same
//! abort-on-first-error bookkeeping, specialized down from a generic pool of
//! `threads` workers to exactly one, since only one chapter may be mid-write
//! per zone at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::error::IndexError;
use crate::name::ChunkName;
use crate::volume::Volume;

struct WriteJob {
    virtual_chapter: u64,
    names: Vec<ChunkName>,
}

/// Runs one chapter write at a time, off the zone's owning thread.
pub struct ChapterWriter {
    input: Option<Sender<WriteJob>>,
    handle: Option<JoinHandle<()>>,
    abort: Arc<Mutex<Option<String>>>,
    memory_allocated: Arc<AtomicUsize>,
}

impl ChapterWriter {
    pub fn new(volume: Arc<dyn Volume>) -> Self {
        let (tx, rx) = bounded::<WriteJob>(1);
        let abort = Arc::new(Mutex::new(None));
        let memory_allocated = Arc::new(AtomicUsize::new(0));

        let worker_abort = Arc::clone(&abort);
        let worker_memory = Arc::clone(&memory_allocated);
        let handle = std::thread::Builder::new()
            .name("chapter-writer".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let freed = job.names.len() * std::mem::size_of::<ChunkName>();
                    if let Err(err) = volume.write_chapter(job.virtual_chapter, &job.names) {
                        let mut guard = worker_abort.lock().unwrap();
                        if guard.is_none() {
                            *guard = Some(err.to_string());
                        }
                    }
                    worker_memory.fetch_sub(freed, Ordering::Relaxed);
                }
            })
            .expect("failed to spawn chapter writer thread");

        ChapterWriter {
            input: Some(tx),
            handle: Some(handle),
            abort,
            memory_allocated,
        }
    }

    /// Hand off a filled chapter. Blocks only if a previous write is still in
    /// flight (the channel has capacity one); callers that need to guarantee
    /// the writer is idle first should call `wait_for_idle_chapter_writer`.
    pub fn write_chapter(&self, virtual_chapter: u64, names: Vec<ChunkName>) -> Result<(), IndexError> {
        self.check_abort()?;
        self.memory_allocated
            .fetch_add(names.len() * std::mem::size_of::<ChunkName>(), Ordering::Relaxed);
        match self.input.as_ref().unwrap().send(WriteJob { virtual_chapter, names }) {
            Ok(()) => Ok(()),
            Err(_) => Err(IndexError::ShuttingDown),
        }
    }

    /// Bytes of open-chapter data currently queued or mid-write. Used by the
    /// zone to decide whether it can afford to open a new chapter before the
    /// previous write has drained.
    pub fn memory_allocated(&self) -> usize {
        self.memory_allocated.load(Ordering::Relaxed)
    }

    /// Block until the writer has no queued or in-flight work.
    pub fn wait_for_idle_chapter_writer(&self) -> Result<(), IndexError> {
        while self.memory_allocated() > 0 {
            std::thread::yield_now();
            self.check_abort()?;
        }
        Ok(())
    }

    fn check_abort(&self) -> Result<(), IndexError> {
        let guard = self.abort.lock().unwrap();
        match &*guard {
            Some(msg) => Err(IndexError::CorruptComponent(msg.clone())),
            None => Ok(()),
        }
    }
}

impl Drop for ChapterWriter {
    fn drop(&mut self) {
        drop(self.input.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::volume::FileVolume;

    fn name(tag: u8) -> ChunkName {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        ChunkName::new(bytes)
    }

    #[test]
    fn write_then_idle_persists_to_volume() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry::dense(4, 4);
        let volume: Arc<dyn Volume> = Arc::new(FileVolume::create(dir.path(), geometry).unwrap());
        let writer = ChapterWriter::new(Arc::clone(&volume));

        writer.write_chapter(0, vec![name(1), name(2)]).unwrap();
        writer.wait_for_idle_chapter_writer().unwrap();

        let page = volume
            .get_record_page(0, 0, crate::volume::LookupMode::Normal)
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}
