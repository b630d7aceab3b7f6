//! C6 — stateless router in front of the zones (spec section 4.4).
//!
//! Each zone runs its own worker thread fed by a `crossbeam_channel`, the
//! same wiring `tools::parallel_handler::ParallelHandler` uses, but adapted
//! from fire-and-forget dispatch to request/response: each submitted job
//! carries a one-shot reply channel because zone operations return a result
//! to the caller.

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::error::{IndexError, IndexResult};
use crate::name::ChunkName;
use crate::request::Request;
use crate::zone::IndexZone;

struct Job {
    request: Request,
    synthesize_barrier: bool,
    reply: Sender<IndexResult<Request>>,
}

struct ZoneWorker {
    input: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

/// Routes requests to the zone owning each chunk name's zone selector.
pub struct Dispatcher {
    workers: Vec<ZoneWorker>,
    single_zone_sparse: bool,
}

impl Dispatcher {
    /// `zones` are handed over one per worker thread; each thread becomes
    /// that zone's sole owning executor for the lifetime of the dispatcher.
    pub fn new(zones: Vec<IndexZone>, sparse: bool) -> Self {
        let single_zone_sparse = sparse && zones.len() == 1;
        let workers = zones
            .into_iter()
            .enumerate()
            .map(|(id, mut zone)| {
                let (tx, rx) = bounded::<Job>(64);
                let handle = std::thread::Builder::new()
                    .name(format!("index-zone-{id}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            let result = run_job(&mut zone, job.request, job.synthesize_barrier);
                            let _ = job.reply.send(result);
                        }
                    })
                    .expect("failed to spawn zone worker thread");
                ZoneWorker {
                    input: Some(tx),
                    handle: Some(handle),
                }
            })
            .collect();

        Dispatcher { workers, single_zone_sparse }
    }

    pub fn zone_count(&self) -> u32 {
        self.workers.len() as u32
    }

    fn zone_id_for(&self, name: ChunkName) -> u32 {
        name.zone_selector(self.zone_count())
    }

    /// Submit one request, blocking the caller until the owning zone has
    /// processed it. A single-zone sparse configuration synthesizes its own
    /// barrier first, since there is no external triage queue to do it.
    pub fn submit(&self, mut request: Request) -> IndexResult<Request> {
        let zone_id = self.zone_id_for(request.name);
        request.zone_number = zone_id;
        let synthesize_barrier = self.single_zone_sparse && !request.requeued;

        let worker = &self.workers[zone_id as usize];
        let (reply_tx, reply_rx) = bounded(1);
        worker
            .input
            .as_ref()
            .ok_or(IndexError::ShuttingDown)?
            .send(Job {
                request,
                synthesize_barrier,
                reply: reply_tx,
            })
            .map_err(|_| IndexError::ShuttingDown)?;
        reply_rx.recv().map_err(|_| IndexError::ShuttingDown)?
    }

    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.input.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs entirely on the zone's owning worker thread: synthesize a barrier if
/// this is a single-zone sparse configuration, then dispatch.
fn run_job(zone: &mut IndexZone, mut request: Request, synthesize_barrier: bool) -> IndexResult<Request> {
    if synthesize_barrier {
        if let Some((sparse, virtual_chapter)) = zone.triage(&request.name) {
            if sparse {
                zone.apply_barrier(virtual_chapter)?;
            }
        }
    }
    zone.dispatch(&mut request)?;
    Ok(request)
}
