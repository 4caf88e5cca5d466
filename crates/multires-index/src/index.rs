//! Read-only in-memory form of a multiresolution mesh index.
//!
//! Built once from bytes or a file, validated up front, and never mutated
//! afterwards, so a `MultiresIndex` can be shared across threads freely.

use std::path::Path;
use std::sync::Arc;

use multires_math::Aabb;
use tracing::info;

use crate::error::IndexError;
use crate::record::{
    ARC_RECORD_SIZE, DagArc, DagNode, FORMAT_VERSION, FRAGMENT_RECORD_SIZE, FragmentHeader,
    IndexHeader, NODE_RECORD_SIZE,
};

/// The refinement DAG and fragment headers of a multiresolution mesh.
#[derive(Clone, Debug)]
pub struct MultiresIndex {
    bbox: Aabb,
    nodes: Vec<DagNode>,
    arcs: Vec<DagArc>,
    fragments: Arc<[FragmentHeader]>,
    roots: Vec<u32>,
}

/// An arc together with the headers of the fragments it contributes.
#[derive(Clone, Copy, Debug)]
pub struct ArcRef<'a> {
    pub arc: &'a DagArc,
    pub fragments: &'a [FragmentHeader],
}

impl ArcRef<'_> {
    pub fn id(&self) -> u32 {
        self.arc.id
    }
}

/// Iterator over the arcs ending in one node, following the
/// `next_arc_with_same_destination` chain.
pub struct IncomingArcs<'a> {
    arcs: &'a [DagArc],
    next: i32,
}

impl<'a> Iterator for IncomingArcs<'a> {
    type Item = &'a DagArc;

    fn next(&mut self) -> Option<Self::Item> {
        let arc = self.arcs.get(usize::try_from(self.next).ok()?)?;
        self.next = arc.next_arc_with_same_destination;
        Some(arc)
    }
}

impl MultiresIndex {
    /// Assemble and validate an index from decoded tables.
    pub(crate) fn from_parts(
        bbox: Aabb,
        nodes: Vec<DagNode>,
        arcs: Vec<DagArc>,
        fragments: Vec<FragmentHeader>,
    ) -> Result<Self, IndexError> {
        validate(&nodes, &arcs, &fragments)?;
        let roots = nodes.iter().filter(|n| n.is_root()).map(|n| n.id).collect();
        Ok(Self {
            bbox,
            nodes,
            arcs,
            fragments: fragments.into(),
            roots,
        })
    }

    /// Decode and validate an index from its binary form.
    pub fn from_bytes(data: &[u8]) -> Result<Self, IndexError> {
        let header = IndexHeader::load(data)?;
        let expected = header.total_size();
        if data.len() < expected {
            return Err(IndexError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let node_base = header.node_table_offset();
        let nodes = (0..header.node_count)
            .map(|id| DagNode::load(data, node_base + id as usize * NODE_RECORD_SIZE, id))
            .collect::<Result<Vec<_>, _>>()?;

        let arc_base = header.arc_table_offset();
        let arcs = (0..header.arc_count)
            .map(|id| DagArc::load(data, arc_base + id as usize * ARC_RECORD_SIZE, id))
            .collect::<Result<Vec<_>, _>>()?;

        let fragment_base = header.fragment_table_offset();
        let fragments = (0..header.fragment_count)
            .map(|id| {
                FragmentHeader::load(data, fragment_base + id as usize * FRAGMENT_RECORD_SIZE, id)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_parts(header.bbox, nodes, arcs, fragments)
    }

    /// Read, decode and validate an index file.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let data = std::fs::read(path)?;
        let index = Self::from_bytes(&data)?;
        info!(
            path = %path.display(),
            nodes = index.nodes.len(),
            arcs = index.arcs.len(),
            fragments = index.fragments.len(),
            "opened multiresolution index"
        );
        Ok(index)
    }

    /// Encode this index in the MRMI binary format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let header = self.header();
        let mut buf = vec![0u8; header.total_size()];
        header.store(&mut buf)?;
        let node_base = header.node_table_offset();
        for node in &self.nodes {
            node.store(&mut buf, node_base + node.id as usize * NODE_RECORD_SIZE)?;
        }
        let arc_base = header.arc_table_offset();
        for arc in &self.arcs {
            arc.store(&mut buf, arc_base + arc.id as usize * ARC_RECORD_SIZE)?;
        }
        let fragment_base = header.fragment_table_offset();
        for fragment in self.fragments.iter() {
            fragment.store(
                &mut buf,
                fragment_base + fragment.id as usize * FRAGMENT_RECORD_SIZE,
            )?;
        }
        Ok(buf)
    }

    /// Write this index to `path`.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// The file header describing this index.
    pub fn header(&self) -> IndexHeader {
        IndexHeader {
            version: FORMAT_VERSION,
            node_count: self.nodes.len() as u32,
            arc_count: self.arcs.len() as u32,
            fragment_count: self.fragments.len() as u32,
            bbox: self.bbox,
        }
    }

    /// Bounding box of the whole mesh.
    pub fn bbox(&self) -> Aabb {
        self.bbox
    }

    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    pub fn arcs(&self) -> &[DagArc] {
        &self.arcs
    }

    pub fn fragments(&self) -> &[FragmentHeader] {
        &self.fragments
    }

    /// Shared handle to the fragment headers, for fragment stores.
    pub fn shared_fragments(&self) -> Arc<[FragmentHeader]> {
        Arc::clone(&self.fragments)
    }

    pub fn node(&self, id: u32) -> Option<&DagNode> {
        self.nodes.get(id as usize)
    }

    pub fn arc(&self, id: u32) -> Option<&DagArc> {
        self.arcs.get(id as usize)
    }

    pub fn fragment(&self, id: u32) -> Option<&FragmentHeader> {
        self.fragments.get(id as usize)
    }

    /// Nodes without incoming arcs, ascending.
    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    /// Number of nodes without outgoing arcs.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Arcs leaving `node`, in id order. Empty for unknown nodes.
    pub fn outgoing_arcs(&self, node: u32) -> &[DagArc] {
        match self.node(node) {
            Some(n) => {
                let range = n.outgoing_arcs();
                &self.arcs[range.start as usize..range.end as usize]
            }
            None => &[],
        }
    }

    /// Arcs ending in `node`.
    pub fn incoming_arcs(&self, node: u32) -> IncomingArcs<'_> {
        IncomingArcs {
            arcs: &self.arcs,
            next: self.node(node).map_or(-1, |n| n.lowest_incoming_arc),
        }
    }

    /// Fragment headers contributed by `arc`.
    pub fn arc_fragments(&self, arc: &DagArc) -> &[FragmentHeader] {
        let range = arc.fragments();
        self.fragments
            .get(range.start as usize..range.end as usize)
            .unwrap_or(&[])
    }

    /// The arc with `id` and its fragment headers.
    pub fn arc_ref(&self, id: u32) -> Option<ArcRef<'_>> {
        let arc = self.arc(id)?;
        Some(ArcRef {
            arc,
            fragments: self.arc_fragments(arc),
        })
    }
}

/// Check every cross reference so that accessors can index without checks.
fn validate(
    nodes: &[DagNode],
    arcs: &[DagArc],
    fragments: &[FragmentHeader],
) -> Result<(), IndexError> {
    let node_count = nodes.len();
    let arc_count = arcs.len();
    let fragment_count = fragments.len();

    if let Some(bad) = fragments.iter().find(|f| f.blob_range().is_none()) {
        return Err(IndexError::FragmentBlobRange { fragment: bad.id });
    }

    for arc in arcs {
        for endpoint in [arc.source_node, arc.destination_node] {
            if usize::try_from(endpoint).map_or(true, |n| n >= node_count) {
                return Err(IndexError::ArcEndpoint {
                    arc: arc.id,
                    node: endpoint,
                });
            }
        }
        let empty = arc.lowest_fragment == -1 && arc.highest_fragment == -1;
        let in_bounds = arc.lowest_fragment >= 0
            && arc.highest_fragment >= arc.lowest_fragment
            && (arc.highest_fragment as usize) < fragment_count;
        if !empty && !in_bounds {
            return Err(IndexError::ArcFragmentRange {
                arc: arc.id,
                lowest: arc.lowest_fragment,
                highest: arc.highest_fragment,
            });
        }
    }

    let mut outgoing_owner = vec![None; arc_count];
    for node in nodes {
        let (lo, hi) = (node.lowest_outgoing_arc, node.highest_outgoing_arc);
        let empty = lo == -1 && hi == -1;
        let in_bounds = lo >= 0 && hi >= lo && (hi as usize) < arc_count;
        if !empty && !in_bounds {
            return Err(IndexError::NodeArcRange {
                node: node.id,
                lowest: lo,
                highest: hi,
            });
        }
        for arc_id in node.outgoing_arcs() {
            let arc = &arcs[arc_id as usize];
            if arc.source_node != node.id as i32 || outgoing_owner[arc_id as usize].is_some() {
                return Err(IndexError::NodeArcRange {
                    node: node.id,
                    lowest: lo,
                    highest: hi,
                });
            }
            outgoing_owner[arc_id as usize] = Some(node.id);
        }
    }
    if let Some(orphan) = outgoing_owner.iter().position(Option::is_none) {
        let arc = &arcs[orphan];
        return Err(IndexError::NodeArcRange {
            node: arc.source(),
            lowest: -1,
            highest: -1,
        });
    }

    // Every arc must sit on exactly its destination's incoming chain.
    let mut on_chain = vec![false; arc_count];
    for node in nodes {
        let mut next = node.lowest_incoming_arc;
        let mut steps = 0usize;
        while next != -1 {
            let valid = usize::try_from(next).is_ok_and(|i| i < arc_count)
                && arcs[next as usize].destination_node == node.id as i32
                && !on_chain[next as usize]
                && steps < arc_count;
            if !valid {
                return Err(IndexError::IncomingChain {
                    node: node.id,
                    arc: next,
                });
            }
            on_chain[next as usize] = true;
            next = arcs[next as usize].next_arc_with_same_destination;
            steps += 1;
        }
    }
    if let Some(missing) = on_chain.iter().position(|&seen| !seen) {
        let arc = &arcs[missing];
        return Err(IndexError::IncomingChain {
            node: arc.destination(),
            arc: arc.id as i32,
        });
    }

    // Kahn's algorithm over nodes: every node must become free of pending
    // incoming arcs, otherwise a cycle exists.
    let mut pending: Vec<usize> = vec![0; node_count];
    for arc in arcs {
        pending[arc.destination() as usize] += 1;
    }
    let mut ready: Vec<u32> = nodes
        .iter()
        .filter(|n| pending[n.id as usize] == 0)
        .map(|n| n.id)
        .collect();
    let mut visited = 0usize;
    while let Some(node) = ready.pop() {
        visited += 1;
        for arc_id in nodes[node as usize].outgoing_arcs() {
            let dest = arcs[arc_id as usize].destination() as usize;
            pending[dest] -= 1;
            if pending[dest] == 0 {
                ready.push(dest as u32);
            }
        }
    }
    if visited != node_count {
        return Err(IndexError::Cycle);
    }

    Ok(())
}
