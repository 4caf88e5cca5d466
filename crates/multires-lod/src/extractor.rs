//! View-dependent cut extraction over the refinement DAG.
//!
//! A cut is a set of arcs whose fragments cover the mesh once. The pass
//! starts from the outgoing arcs of every root node and repeatedly asks the
//! criterion whether an arc of the cut should be refined. Refining an arc
//! applies its destination node: the node's incoming arcs leave the cut and
//! its outgoing arcs join it. A node whose incoming arcs come from nodes not
//! yet applied pulls those ancestors in first, so the cut never holds two
//! levels of the same region at once.

use std::collections::VecDeque;

use multires_fragment::{FragmentBlobReader, FragmentStore};
use multires_index::MultiresIndex;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::criterion::LodCriterion;
use crate::view::ViewState;

/// Decides whether the geometry a node would bring in is available.
pub trait FragmentResidency {
    /// Whether `fragment` can be shown now. May start loading it when not.
    fn ensure_resident(&self, fragment: u32) -> bool;
}

/// Treats every fragment as available.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllResident;

impl FragmentResidency for AllResident {
    fn ensure_resident(&self, _fragment: u32) -> bool {
        true
    }
}

/// Blocking residency: loads on the calling thread, failures read as absent.
impl<R: FragmentBlobReader> FragmentResidency for FragmentStore<R> {
    fn ensure_resident(&self, fragment: u32) -> bool {
        self.load(fragment).is_ok()
    }
}

/// Counters of one extraction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CutStats {
    /// Criterion evaluations.
    pub arcs_evaluated: usize,
    /// Nodes applied, forced ancestors included.
    pub nodes_applied: usize,
    /// Refinements skipped because finer fragments were not resident.
    pub refinements_deferred: usize,
}

/// Result of one extraction pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cut {
    arcs: Vec<u32>,
    fragments: Vec<u32>,
    stats: CutStats,
}

impl Cut {
    /// Active arc ids, ascending.
    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    /// Fragment ids of the active arcs, in arc order.
    pub fn fragments(&self) -> &[u32] {
        &self.fragments
    }

    pub fn stats(&self) -> &CutStats {
        &self.stats
    }

    pub fn contains_arc(&self, id: u32) -> bool {
        self.arcs.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }
}

/// Mutable state of one pass.
struct Pass<'a> {
    index: &'a MultiresIndex,
    applied: Vec<bool>,
    in_cut: Vec<bool>,
    queue: VecDeque<u32>,
    stats: CutStats,
}

impl Pass<'_> {
    fn apply(&mut self, node: u32) {
        let Some(slot) = self.applied.get_mut(node as usize) else {
            return;
        };
        *slot = true;
        self.stats.nodes_applied += 1;
        for arc in self.index.incoming_arcs(node) {
            self.in_cut[arc.id as usize] = false;
        }
        for arc in self.index.outgoing_arcs(node) {
            self.in_cut[arc.id as usize] = true;
            self.queue.push_back(arc.id);
        }
    }

    /// `node` and every unapplied ancestor it depends on, ancestors first.
    fn application_order(&self, node: u32) -> Vec<u32> {
        let mut order = Vec::new();
        let mut planned = FxHashSet::default();
        // (node, children expanded)
        let mut stack = vec![(node, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            if !planned.insert(current) {
                continue;
            }
            stack.push((current, true));
            for arc in self.index.incoming_arcs(current) {
                let source = arc.source();
                if !self.applied[source as usize] && !planned.contains(&source) {
                    stack.push((source, false));
                }
            }
        }
        order
    }

    /// Whether the fragments that applying `nodes` brings into the cut are
    /// all resident. Arcs ending at another node of `nodes` are consumed by
    /// the same application and need nothing.
    fn fragments_resident<F: FragmentResidency + ?Sized>(&self, nodes: &[u32], residency: &F) -> bool {
        let mut all = true;
        for &node in nodes {
            let exposed = self
                .index
                .outgoing_arcs(node)
                .iter()
                .filter(|arc| !nodes.contains(&arc.destination()));
            for arc in exposed {
                for fragment in self.index.arc_fragments(arc) {
                    // Keep asking so every missing fragment gets requested.
                    all &= residency.ensure_resident(fragment.id);
                }
            }
        }
        all
    }
}

/// Extracts cuts from one index.
pub struct Extractor<'a> {
    index: &'a MultiresIndex,
}

impl<'a> Extractor<'a> {
    pub fn new(index: &'a MultiresIndex) -> Self {
        Self { index }
    }

    /// Extract assuming every fragment is available.
    pub fn extract<V: ViewState + ?Sized>(&self, criterion: &LodCriterion, view: &V) -> Cut {
        self.extract_with(criterion, view, &AllResident)
    }

    /// Extract, refining only where `residency` reports the finer
    /// fragments available. Deferred arcs stay in the cut at their coarser level.
    pub fn extract_with<V, F>(&self, criterion: &LodCriterion, view: &V, residency: &F) -> Cut
    where
        V: ViewState + ?Sized,
        F: FragmentResidency + ?Sized,
    {
        let index = self.index;
        let mut pass = Pass {
            index,
            applied: vec![false; index.nodes().len()],
            in_cut: vec![false; index.arcs().len()],
            queue: VecDeque::new(),
            stats: CutStats::default(),
        };
        for &root in index.roots() {
            pass.apply(root);
        }
        // Roots are where the pass starts, not refinements.
        pass.stats.nodes_applied = 0;

        let mut visited = FxHashSet::default();
        while let Some(arc_id) = pass.queue.pop_front() {
            if !pass.in_cut[arc_id as usize] || !visited.insert(arc_id) {
                continue;
            }
            let Some(arc_ref) = index.arc_ref(arc_id) else {
                continue;
            };
            let destination = arc_ref.arc.destination();
            let is_leaf = index.node(destination).is_none_or(|n| n.is_leaf());
            if is_leaf || pass.applied[destination as usize] {
                continue;
            }

            pass.stats.arcs_evaluated += 1;
            if !criterion.needs_refinement(arc_ref, view) {
                continue;
            }

            let order = pass.application_order(destination);
            if !pass.fragments_resident(&order, residency) {
                pass.stats.refinements_deferred += 1;
                continue;
            }
            for node in order {
                pass.apply(node);
            }
        }

        let arcs: Vec<u32> = (0..index.arcs().len() as u32)
            .filter(|&id| pass.in_cut[id as usize])
            .collect();
        let fragments = arcs
            .iter()
            .filter_map(|&id| index.arc(id))
            .flat_map(|arc| index.arc_fragments(arc).iter().map(|f| f.id))
            .collect();

        debug!(
            arcs = arcs.len(),
            evaluated = pass.stats.arcs_evaluated,
            applied = pass.stats.nodes_applied,
            deferred = pass.stats.refinements_deferred,
            "extracted cut"
        );
        Cut {
            arcs,
            fragments,
            stats: pass.stats,
        }
    }
}
