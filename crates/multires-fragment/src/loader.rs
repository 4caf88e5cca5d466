//! Background fragment loading: offloads blob I/O to a worker pool fed by a
//! bounded queue, with results collected once per frame on the render thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use dashmap::DashSet;
use tracing::{debug, warn};

use crate::blob::FragmentBlobReader;
use crate::error::FragmentError;
use crate::store::FragmentStore;

/// Result of one background load.
#[derive(Debug)]
pub enum LoadOutcome {
    /// The payload is now resident in the store.
    Loaded { id: u32, bytes: usize },
    /// The blob reader failed; the fragment stays unloaded.
    Failed { id: u32, error: FragmentError },
}

impl LoadOutcome {
    pub fn id(&self) -> u32 {
        match self {
            LoadOutcome::Loaded { id, .. } | LoadOutcome::Failed { id, .. } => *id,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }
}

/// Worker pool loading fragments into a shared [`FragmentStore`].
///
/// The render thread calls [`request`](Self::request) for fragments it wants
/// and [`drain_completed`](Self::drain_completed) once per frame. Requests
/// never block: a full queue refuses the request and the caller asks again
/// next frame.
pub struct FragmentLoader<R> {
    store: Arc<FragmentStore<R>>,
    /// Sender half of the work queue. `None` after shutdown.
    task_sender: Option<crossbeam_channel::Sender<u32>>,
    result_receiver: crossbeam_channel::Receiver<LoadOutcome>,
    worker_handles: Vec<JoinHandle<()>>,
    /// Ids queued or being loaded.
    pending: Arc<DashSet<u32>>,
    in_flight: Arc<AtomicUsize>,
}

impl<R: FragmentBlobReader + 'static> FragmentLoader<R> {
    /// Spawn `worker_count` loader threads with room for `queue_capacity`
    /// queued requests.
    pub fn new(
        store: Arc<FragmentStore<R>>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, FragmentError> {
        let (task_tx, task_rx) = crossbeam_channel::bounded::<u32>(queue_capacity.max(1));
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let pending = Arc::new(DashSet::new());
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            let store = Arc::clone(&store);
            let pending = Arc::clone(&pending);
            let flight = Arc::clone(&in_flight);

            let handle = std::thread::Builder::new()
                .name("fragment-loader".into())
                .spawn(move || {
                    while let Ok(id) = rx.recv() {
                        let outcome = match store.load(id) {
                            Ok(payload) => LoadOutcome::Loaded {
                                id,
                                bytes: payload.byte_size(),
                            },
                            Err(error) => LoadOutcome::Failed { id, error },
                        };
                        pending.remove(&id);
                        // Settle the count before the outcome becomes visible.
                        flight.fetch_sub(1, Ordering::Release);
                        let _ = tx.send(outcome);
                    }
                })
                .map_err(FragmentError::Spawn)?;
            handles.push(handle);
        }

        debug!(
            workers = handles.len(),
            queue_capacity, "fragment loader started"
        );

        Ok(Self {
            store,
            task_sender: Some(task_tx),
            result_receiver: result_rx,
            worker_handles: handles,
            pending,
            in_flight,
        })
    }

    /// Worker threads for an unconfigured loader: all cores but two, at
    /// least one.
    pub fn default_worker_count() -> usize {
        num_cpus::get().saturating_sub(2).max(1)
    }

    pub fn store(&self) -> &Arc<FragmentStore<R>> {
        &self.store
    }

    /// Queue `id` for loading. Returns `true` if a new load was queued.
    ///
    /// Returns `false` when the fragment is unknown, already resident, already
    /// pending, the queue is full, or the loader has been shut down.
    pub fn request(&self, id: u32) -> bool {
        let Some(sender) = &self.task_sender else {
            return false;
        };
        if self.store.header(id).is_none() || self.store.resident(id).is_some() {
            return false;
        }
        if !self.pending.insert(id) {
            return false;
        }
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = sender.try_send(id) {
            self.pending.remove(&id);
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            if err.is_disconnected() {
                warn!(fragment = id, "fragment loader queue disconnected");
            }
            return false;
        }
        true
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains(&id)
    }

    /// Drain all completed loads. Called once per frame on the render thread.
    pub fn drain_completed(&self) -> Vec<LoadOutcome> {
        self.result_receiver.try_iter().collect()
    }

    /// Number of loads queued or running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Stop accepting requests, let workers finish queued loads, and join them.
    pub fn shutdown(&mut self) {
        self.task_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<R> Drop for FragmentLoader<R> {
    fn drop(&mut self) {
        self.task_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}
