//! Lazily loading cache of fragment payloads.
//!
//! Headers are immutable and shared with the index. Payloads live in one
//! mutex-guarded slot per fragment, so two threads never load or unload the
//! same fragment at the same time, while different fragments load in parallel.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use multires_index::FragmentHeader;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::blob::FragmentBlobReader;
use crate::budget::{EvictionCandidate, MemoryBudget, select_evictions};
use crate::error::FragmentError;
use crate::payload::FragmentPayload;

#[derive(Default)]
struct Slot {
    payload: Option<Arc<FragmentPayload>>,
    loads: u32,
}

/// `last_used` stays outside the mutex: a slot is held for a whole blob read.
#[derive(Default)]
struct FragmentSlot {
    state: Mutex<Slot>,
    last_used: AtomicU64,
}

/// Owner of all loaded fragment payloads of one mesh.
pub struct FragmentStore<R> {
    headers: Arc<[FragmentHeader]>,
    reader: R,
    slots: Box<[FragmentSlot]>,
    resident_bytes: AtomicUsize,
}

impl<R: FragmentBlobReader> FragmentStore<R> {
    pub fn new(headers: Arc<[FragmentHeader]>, reader: R) -> Self {
        let slots = (0..headers.len()).map(|_| FragmentSlot::default()).collect();
        Self {
            headers,
            reader,
            slots,
            resident_bytes: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn header(&self, id: u32) -> Option<&FragmentHeader> {
        self.headers.get(id as usize)
    }

    pub fn headers(&self) -> &[FragmentHeader] {
        &self.headers
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    fn slot(&self, id: u32) -> Result<MutexGuard<'_, Slot>, FragmentError> {
        let slot = self
            .slots
            .get(id as usize)
            .ok_or(FragmentError::UnknownFragment(id))?;
        Ok(slot.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// The slot of `id` unless another thread holds it.
    fn try_slot(&self, id: u32) -> Option<MutexGuard<'_, Slot>> {
        match self.slots.get(id as usize)?.state.try_lock() {
            Ok(slot) => Some(slot),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Load the payload of `id` unless it is already resident, and return it.
    ///
    /// Blocks on blob I/O. On failure the fragment stays unloaded and the
    /// error is returned; a later call tries again.
    pub fn load(&self, id: u32) -> Result<Arc<FragmentPayload>, FragmentError> {
        let header = self.header(id).ok_or(FragmentError::UnknownFragment(id))?;
        let mut slot = self.slot(id)?;
        if let Some(payload) = &slot.payload {
            return Ok(Arc::clone(payload));
        }

        slot.loads += 1;
        let result = match header.blob_range() {
            Some((offset, length)) => self.reader.read(id, offset, length),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "negative blob range",
            )),
        };
        match result {
            Ok(payload) => {
                let payload = Arc::new(payload);
                self.resident_bytes
                    .fetch_add(payload.byte_size(), Ordering::Relaxed);
                slot.payload = Some(Arc::clone(&payload));
                Ok(payload)
            }
            Err(source) => {
                warn!(fragment = id, error = %source, "fragment load failed");
                Err(FragmentError::Load { id, source })
            }
        }
    }

    /// Same as [`FragmentStore::load`].
    pub fn payload(&self, id: u32) -> Result<Arc<FragmentPayload>, FragmentError> {
        self.load(id)
    }

    pub fn vertices(&self, id: u32) -> Result<Arc<[[f32; 3]]>, FragmentError> {
        Ok(Arc::clone(&self.load(id)?.vertices))
    }

    pub fn normals(&self, id: u32) -> Result<Arc<[[f32; 3]]>, FragmentError> {
        Ok(Arc::clone(&self.load(id)?.normals))
    }

    pub fn triangle_indices(&self, id: u32) -> Result<Arc<[u32]>, FragmentError> {
        Ok(Arc::clone(&self.load(id)?.indices))
    }

    pub fn triangle_count(&self, id: u32) -> Result<usize, FragmentError> {
        Ok(self.load(id)?.triangle_count())
    }

    /// Release the payload of `id`. Returns whether anything was released.
    pub fn unload(&self, id: u32) -> bool {
        match self.slot(id) {
            Ok(slot) => self.release(slot),
            Err(_) => false,
        }
    }

    fn release(&self, mut slot: MutexGuard<'_, Slot>) -> bool {
        match slot.payload.take() {
            Some(payload) => {
                self.resident_bytes
                    .fetch_sub(payload.byte_size(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn is_loaded(&self, id: u32) -> bool {
        self.slot(id).is_ok_and(|slot| slot.payload.is_some())
    }

    /// The payload of `id` if it is resident right now.
    ///
    /// Never blocks: a slot held by a loading worker reads as not resident.
    pub fn resident(&self, id: u32) -> Option<Arc<FragmentPayload>> {
        self.try_slot(id)?.payload.clone()
    }

    /// How many times the blob reader was called for `id`.
    pub fn load_count(&self, id: u32) -> u32 {
        self.slot(id).map_or(0, |slot| slot.loads)
    }

    /// Record that `id` was used in `frame`. Never blocks.
    pub fn touch(&self, id: u32, frame: u64) {
        if let Some(slot) = self.slots.get(id as usize) {
            slot.last_used.fetch_max(frame, Ordering::Relaxed);
        }
    }

    /// Bytes held by all resident payloads.
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes.load(Ordering::Relaxed)
    }

    pub fn loaded_count(&self) -> usize {
        (0..self.slots.len() as u32)
            .filter(|&id| self.is_loaded(id))
            .count()
    }

    /// Unload least recently used fragments not in `keep` until resident
    /// payloads fit `budget`. Returns the unloaded ids.
    ///
    /// Never blocks: slots held by a loading worker are skipped this round.
    pub fn evict_to_budget(&self, budget: &MemoryBudget, keep: &FxHashSet<u32>) -> Vec<u32> {
        let overage = budget.overage(self.resident_bytes());
        if overage == 0 {
            return Vec::new();
        }

        let candidates: Vec<EvictionCandidate> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                let state = self.try_slot(id as u32)?;
                state.payload.as_ref().map(|p| EvictionCandidate {
                    id: id as u32,
                    bytes: p.byte_size(),
                    last_used: slot.last_used.load(Ordering::Relaxed),
                })
            })
            .collect();

        let evicted: Vec<u32> = select_evictions(&candidates, overage, keep)
            .into_iter()
            .filter(|&id| self.try_slot(id).is_some_and(|slot| self.release(slot)))
            .collect();
        debug!(
            evicted = evicted.len(),
            resident_bytes = self.resident_bytes(),
            limit_bytes = budget.limit_bytes,
            "evicted fragments"
        );
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobReader;
    use glam::Vec3;
    use multires_math::Aabb;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::sync::{Condvar, mpsc};
    use std::time::{Duration, Instant};

    /// Wraps a reader and counts calls.
    struct CountingReader {
        inner: MemoryBlobReader,
        reads: AtomicU32,
    }

    impl FragmentBlobReader for CountingReader {
        fn read(&self, id: u32, offset: u64, length: u32) -> io::Result<FragmentPayload> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(id, offset, length)
        }
    }

    struct FailingReader;

    impl FragmentBlobReader for FailingReader {
        fn read(&self, _id: u32, _offset: u64, _length: u32) -> io::Result<FragmentPayload> {
            Err(io::Error::new(io::ErrorKind::NotFound, "blob missing"))
        }
    }

    fn payload(n: usize) -> FragmentPayload {
        FragmentPayload::new(
            (0..n).map(|i| [i as f32, 0.0, 0.0]).collect(),
            vec![[0.0, 0.0, 1.0]; n],
            vec![0, 1, 2],
        )
    }

    /// Three fragments of 3, 4 and 5 vertices back to back in one blob.
    fn fixture() -> (Arc<[FragmentHeader]>, MemoryBlobReader) {
        let mut blob = Vec::new();
        let mut headers = Vec::new();
        for (id, n) in [3usize, 4, 5].into_iter().enumerate() {
            let bytes = payload(n).encode();
            headers.push(FragmentHeader {
                id: id as u32,
                bbox: Aabb::new(Vec3::ZERO, Vec3::splat(n as f32)),
                error: 0.1,
                blob_position: blob.len() as i64,
                length: bytes.len() as i32,
            });
            blob.extend_from_slice(&bytes);
        }
        (headers.into(), MemoryBlobReader::new(blob))
    }

    fn counting_store() -> FragmentStore<CountingReader> {
        let (headers, inner) = fixture();
        FragmentStore::new(
            headers,
            CountingReader {
                inner,
                reads: AtomicU32::new(0),
            },
        )
    }

    #[test]
    fn test_first_access_loads_and_memoizes() {
        let store = counting_store();
        assert!(!store.is_loaded(1));
        assert_eq!(store.vertices(1).unwrap().len(), 4);
        assert_eq!(store.normals(1).unwrap().len(), 4);
        assert_eq!(store.triangle_indices(1).unwrap().len(), 3);
        assert_eq!(store.triangle_count(1).unwrap(), 1);
        assert!(store.is_loaded(1));
        assert_eq!(store.load_count(1), 1);
        assert_eq!(store.reader().reads.load(Ordering::SeqCst), 1);
    }

    /// After unload, the next access reads the blob exactly once more.
    #[test]
    fn test_unload_then_access_reloads_once() {
        let store = counting_store();
        store.vertices(0).unwrap();
        assert!(store.unload(0));
        assert!(!store.is_loaded(0));

        store.vertices(0).unwrap();
        store.normals(0).unwrap();
        assert_eq!(store.load_count(0), 2);
        assert_eq!(store.reader().reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unload_when_not_loaded_is_noop() {
        let store = counting_store();
        assert!(!store.unload(2));
        assert!(!store.unload(99));
        assert_eq!(store.resident_bytes(), 0);
    }

    /// A failing reader yields a load error and leaves the fragment unloaded.
    #[test]
    fn test_failed_load_stays_unloaded() {
        let (headers, _) = fixture();
        let store = FragmentStore::new(headers, FailingReader);
        let err = store.vertices(0).unwrap_err();
        assert!(matches!(err, FragmentError::Load { id: 0, .. }));
        assert!(!store.is_loaded(0));
        assert_eq!(store.resident_bytes(), 0);

        // Each attempt reaches the reader again.
        assert!(store.load(0).is_err());
        assert_eq!(store.load_count(0), 2);
    }

    #[test]
    fn test_unknown_fragment() {
        let store = counting_store();
        assert!(matches!(store.load(7), Err(FragmentError::UnknownFragment(7))));
        assert!(store.header(7).is_none());
        assert!(store.resident(7).is_none());
    }

    #[test]
    fn test_resident_bytes_tracks_loads() {
        let store = counting_store();
        let a = store.load(0).unwrap().byte_size();
        let b = store.load(2).unwrap().byte_size();
        assert_eq!(store.resident_bytes(), a + b);
        assert_eq!(store.loaded_count(), 2);
        store.unload(0);
        assert_eq!(store.resident_bytes(), b);
    }

    /// Buffers handed out earlier stay valid after the store unloads them.
    #[test]
    fn test_buffers_outlive_unload() {
        let store = counting_store();
        let vertices = store.vertices(2).unwrap();
        store.unload(2);
        assert_eq!(vertices.len(), 5);
    }

    #[test]
    fn test_resident_does_not_load() {
        let store = counting_store();
        assert!(store.resident(1).is_none());
        assert_eq!(store.load_count(1), 0);
        store.load(1).unwrap();
        assert!(store.resident(1).is_some());
    }

    /// Eviction frees least recently used fragments and spares kept ones.
    #[test]
    fn test_evict_to_budget() {
        let store = counting_store();
        for id in 0..3 {
            store.load(id).unwrap();
        }
        store.touch(0, 5);
        store.touch(1, 1);
        store.touch(2, 3);
        let sizes: Vec<usize> = (0..3).map(|id| store.load(id).unwrap().byte_size()).collect();

        let keep: FxHashSet<u32> = [1].into_iter().collect();
        let budget = MemoryBudget::new(sizes[0] + sizes[1]);
        let evicted = store.evict_to_budget(&budget, &keep);

        assert_eq!(evicted, vec![2]);
        assert!(store.is_loaded(0));
        assert!(store.is_loaded(1));
        assert!(!store.is_loaded(2));
        assert!(store.resident_bytes() <= budget.limit_bytes);
    }

    /// Holds reads of one fragment until released and flags when one starts.
    struct GatedReader {
        inner: MemoryBlobReader,
        gated: u32,
        entered: Arc<AtomicBool>,
        gate: Arc<(Mutex<bool>, Condvar)>,
    }

    impl FragmentBlobReader for GatedReader {
        fn read(&self, id: u32, offset: u64, length: u32) -> io::Result<FragmentPayload> {
            if id == self.gated {
                self.entered.store(true, Ordering::SeqCst);
                let (lock, cvar) = &*self.gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
            }
            self.inner.read(id, offset, length)
        }
    }

    /// Eviction and touch return while a worker is inside a blob read, and
    /// leave the loading fragment alone.
    #[test]
    fn test_eviction_does_not_wait_for_loading_slot() {
        let (headers, inner) = fixture();
        let entered = Arc::new(AtomicBool::new(false));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let store = Arc::new(FragmentStore::new(
            headers,
            GatedReader {
                inner,
                gated: 0,
                entered: Arc::clone(&entered),
                gate: Arc::clone(&gate),
            },
        ));
        store.load(1).unwrap();
        store.load(2).unwrap();

        let loading = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.load(0).is_ok())
        };
        let start = Instant::now();
        while !entered.load(Ordering::SeqCst) {
            assert!(start.elapsed().as_secs() < 5, "Timed out waiting for the load to start");
            std::thread::sleep(Duration::from_millis(1));
        }

        let (tx, rx) = mpsc::channel();
        {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                store.touch(0, 7);
                let evicted = store.evict_to_budget(&MemoryBudget::new(0), &FxHashSet::default());
                let _ = tx.send(evicted);
            });
        }
        let evicted = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("eviction blocked on a loading slot");
        assert_eq!(evicted, vec![1, 2]);

        *gate.0.lock().unwrap() = true;
        gate.1.notify_all();
        assert!(loading.join().unwrap());
        assert!(store.is_loaded(0));
    }

    #[test]
    fn test_concurrent_loads_read_once() {
        let store = Arc::new(counting_store());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.load(2).unwrap().vertex_count())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 5);
        }
        assert_eq!(store.load_count(2), 1);
    }
}
