//! Per-frame driver tying extraction to background fragment streaming.

use std::cell::Cell;
use std::sync::Arc;

use multires_fragment::{
    FragmentBlobReader, FragmentLoader, FragmentPayload, FragmentStore, LoadOutcome, MemoryBudget,
};
use multires_index::MultiresIndex;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::criterion::LodCriterion;
use crate::extractor::{Cut, Extractor, FragmentResidency};
use crate::view::ViewState;

/// What the renderer gets for one frame.
#[derive(Debug)]
pub struct Frame {
    pub number: u64,
    pub cut: Cut,
    /// Resident payloads of the cut, in cut order.
    pub ready: Vec<(u32, Arc<FragmentPayload>)>,
    /// Fragments of the cut that are not resident yet or failed to load.
    pub missing: Vec<u32>,
    /// Fragments unloaded to stay within the memory budget.
    pub evicted: Vec<u32>,
}

/// Non-blocking residency: resident fragments are available, everything
/// else is queued on the loader up to a per-frame request limit.
struct StreamingResidency<'a, R> {
    loader: &'a FragmentLoader<R>,
    failed: &'a FxHashSet<u32>,
    requests_left: Cell<usize>,
}

impl<R: FragmentBlobReader + 'static> StreamingResidency<'_, R> {
    fn request(&self, fragment: u32) {
        let left = self.requests_left.get();
        if left > 0 && !self.failed.contains(&fragment) && self.loader.request(fragment) {
            self.requests_left.set(left - 1);
        }
    }
}

impl<R: FragmentBlobReader + 'static> FragmentResidency for StreamingResidency<'_, R> {
    fn ensure_resident(&self, fragment: u32) -> bool {
        if self.loader.store().resident(fragment).is_some() {
            return true;
        }
        self.request(fragment);
        false
    }
}

/// Runs one extraction per frame against a streaming fragment store.
///
/// Refinement waits until the finer fragments are resident, so the render
/// thread never blocks on blob I/O; until then the coarser level is shown.
pub struct StreamingExtractor<R> {
    index: Arc<MultiresIndex>,
    loader: FragmentLoader<R>,
    budget: MemoryBudget,
    max_requests_per_frame: usize,
    frame: u64,
    /// Fragments whose last load failed. Not requested again until
    /// [`retry_failed`](Self::retry_failed).
    failed: FxHashSet<u32>,
}

impl<R: FragmentBlobReader + 'static> StreamingExtractor<R> {
    pub fn new(index: Arc<MultiresIndex>, loader: FragmentLoader<R>, budget: MemoryBudget) -> Self {
        Self {
            index,
            loader,
            budget,
            max_requests_per_frame: 32,
            frame: 0,
            failed: FxHashSet::default(),
        }
    }

    pub fn with_max_requests_per_frame(mut self, max: usize) -> Self {
        self.max_requests_per_frame = max;
        self
    }

    pub fn index(&self) -> &Arc<MultiresIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<FragmentStore<R>> {
        self.loader.store()
    }

    pub fn loader(&self) -> &FragmentLoader<R> {
        &self.loader
    }

    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    pub fn failed(&self) -> impl Iterator<Item = u32> + '_ {
        self.failed.iter().copied()
    }

    /// Allow previously failed fragments to be requested again.
    pub fn retry_failed(&mut self) {
        self.failed.clear();
    }

    fn collect_completed(&mut self) {
        for outcome in self.loader.drain_completed() {
            match outcome {
                LoadOutcome::Loaded { id, .. } => {
                    self.failed.remove(&id);
                    // Fresh loads count as used so eviction does not drop them at once.
                    self.loader.store().touch(id, self.frame);
                }
                LoadOutcome::Failed { id, .. } => {
                    self.failed.insert(id);
                }
            }
        }
    }

    /// Extract this frame's cut, gather its resident payloads, request the
    /// rest, and evict down to the memory budget.
    pub fn extract<V: ViewState + ?Sized>(&mut self, criterion: &LodCriterion, view: &V) -> Frame {
        self.frame += 1;
        self.collect_completed();

        let residency = StreamingResidency {
            loader: &self.loader,
            failed: &self.failed,
            requests_left: Cell::new(self.max_requests_per_frame),
        };
        let cut = Extractor::new(&self.index).extract_with(criterion, view, &residency);

        let store = self.loader.store();
        let mut ready = Vec::with_capacity(cut.fragments().len());
        let mut missing = Vec::new();
        for &id in cut.fragments() {
            match store.resident(id) {
                Some(payload) => {
                    store.touch(id, self.frame);
                    ready.push((id, payload));
                }
                None => {
                    residency.request(id);
                    missing.push(id);
                }
            }
        }

        let keep: FxHashSet<u32> = cut.fragments().iter().copied().collect();
        let evicted = store.evict_to_budget(&self.budget, &keep);

        debug!(
            frame = self.frame,
            arcs = cut.len(),
            ready = ready.len(),
            missing = missing.len(),
            evicted = evicted.len(),
            in_flight = self.loader.in_flight_count(),
            "streamed frame"
        );
        Frame {
            number: self.frame,
            cut,
            ready,
            missing,
            evicted,
        }
    }
}
