//! Programmatic construction of a [`MultiresIndex`].
//!
//! Used by tooling and tests to lay out nodes, arcs and fragments with the
//! id ordering the binary format requires: arcs contiguous per source node,
//! fragments contiguous per arc.

use multires_math::Aabb;

use crate::error::IndexError;
use crate::index::MultiresIndex;
use crate::record::{DagArc, DagNode, FragmentHeader, NO_ID};

/// A fragment header before its id is assigned.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FragmentSpec {
    pub bbox: Aabb,
    pub error: f32,
    pub blob_position: i64,
    pub length: i32,
}

struct PendingNode {
    geometry_error: f32,
    bbox: Aabb,
}

struct PendingArc {
    source: u32,
    destination: u32,
    geometric_error: f32,
    fragments: Vec<FragmentSpec>,
}

/// Collects nodes and arcs, then assigns record ids and links.
///
/// Node ids are assigned in insertion order. Arc ids are assigned ordered by
/// source node and, within one source, by insertion; adding arcs grouped by
/// ascending source node therefore keeps ids equal to insertion order.
/// Fragment ids follow arc ids.
#[derive(Default)]
pub struct IndexBuilder {
    nodes: Vec<PendingNode>,
    arcs: Vec<PendingArc>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its id.
    pub fn add_node(&mut self, geometry_error: f32, bbox: Aabb) -> u32 {
        self.nodes.push(PendingNode {
            geometry_error,
            bbox,
        });
        (self.nodes.len() - 1) as u32
    }

    /// Add an arc from `source` to `destination` carrying `fragments`.
    pub fn add_arc(
        &mut self,
        source: u32,
        destination: u32,
        geometric_error: f32,
        fragments: impl IntoIterator<Item = FragmentSpec>,
    ) {
        self.arcs.push(PendingArc {
            source,
            destination,
            geometric_error,
            fragments: fragments.into_iter().collect(),
        });
    }

    /// Assign ids, link incoming chains and validate the result.
    pub fn build(mut self) -> Result<MultiresIndex, IndexError> {
        self.arcs.sort_by_key(|a| a.source);

        let mut nodes: Vec<DagNode> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(id, n)| DagNode {
                id: id as u32,
                lowest_outgoing_arc: NO_ID,
                highest_outgoing_arc: NO_ID,
                lowest_incoming_arc: NO_ID,
                geometry_error: n.geometry_error,
                bbox: n.bbox,
            })
            .collect();

        let mut arcs = Vec::with_capacity(self.arcs.len());
        let mut fragments = Vec::new();
        for (arc_id, pending) in self.arcs.iter().enumerate() {
            let arc_id = arc_id as u32;
            let first_fragment = fragments.len() as i32;
            for spec in &pending.fragments {
                fragments.push(FragmentHeader {
                    id: fragments.len() as u32,
                    bbox: spec.bbox,
                    error: spec.error,
                    blob_position: spec.blob_position,
                    length: spec.length,
                });
            }
            let (lowest_fragment, highest_fragment) = if pending.fragments.is_empty() {
                (NO_ID, NO_ID)
            } else {
                (first_fragment, fragments.len() as i32 - 1)
            };

            let bbox = pending
                .fragments
                .iter()
                .map(|f| f.bbox)
                .reduce(|a, b| a.union(&b))
                .or_else(|| self.nodes.get(pending.destination as usize).map(|n| n.bbox))
                .unwrap_or(Aabb::from_array([0.0; 6]));

            // Link into the destination's incoming chain, newest first.
            let mut next_arc_with_same_destination = NO_ID;
            if let Some(dest) = nodes.get_mut(pending.destination as usize) {
                next_arc_with_same_destination = dest.lowest_incoming_arc;
                dest.lowest_incoming_arc = arc_id as i32;
            }
            if let Some(source) = nodes.get_mut(pending.source as usize) {
                if source.lowest_outgoing_arc == NO_ID {
                    source.lowest_outgoing_arc = arc_id as i32;
                }
                source.highest_outgoing_arc = arc_id as i32;
            }

            arcs.push(DagArc {
                id: arc_id,
                source_node: pending.source as i32,
                destination_node: pending.destination as i32,
                next_arc_with_same_destination,
                lowest_fragment,
                highest_fragment,
                geometric_error: pending.geometric_error,
                bbox,
            });
        }

        let bbox = nodes
            .iter()
            .map(|n| n.bbox)
            .chain(fragments.iter().map(|f| f.bbox))
            .reduce(|a, b| a.union(&b))
            .unwrap_or(Aabb::from_array([0.0; 6]));

        MultiresIndex::from_parts(bbox, nodes, arcs, fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn spec(lo: f32, hi: f32) -> FragmentSpec {
        FragmentSpec {
            bbox: Aabb::new(Vec3::splat(lo), Vec3::splat(hi)),
            error: 0.5,
            blob_position: 0,
            length: 0,
        }
    }

    /// Arcs added out of source order are regrouped per source node.
    #[test]
    fn test_arcs_grouped_by_source() {
        let mut b = IndexBuilder::new();
        let bbox = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let n0 = b.add_node(2.0, bbox);
        let n1 = b.add_node(1.0, bbox);
        let n2 = b.add_node(0.0, bbox);
        b.add_arc(n1, n2, 1.0, [spec(0.0, 1.0)]);
        b.add_arc(n0, n1, 2.0, [spec(0.0, 2.0)]);
        let index = b.build().unwrap();

        assert_eq!(index.arc(0).unwrap().source_node, 0);
        assert_eq!(index.arc(1).unwrap().source_node, 1);
        assert_eq!(index.node(0).unwrap().outgoing_arcs(), 0..1);
        assert_eq!(index.node(1).unwrap().outgoing_arcs(), 1..2);
        // Fragments follow arc ids, not insertion order.
        assert_eq!(index.arc_fragments(index.arc(0).unwrap())[0].bbox.max, Vec3::splat(2.0));
    }

    #[test]
    fn test_arc_bbox_is_fragment_union() {
        let mut b = IndexBuilder::new();
        let bbox = Aabb::new(Vec3::ZERO, Vec3::splat(100.0));
        let n0 = b.add_node(1.0, bbox);
        let n1 = b.add_node(0.0, bbox);
        b.add_arc(n0, n1, 1.0, [spec(0.0, 1.0), spec(4.0, 6.0)]);
        let index = b.build().unwrap();
        let arc = index.arc(0).unwrap();
        assert_eq!(arc.bbox, Aabb::new(Vec3::ZERO, Vec3::splat(6.0)));
        assert_eq!(arc.fragments(), 0..2);
    }

    #[test]
    fn test_arc_without_fragments_uses_destination_box() {
        let mut b = IndexBuilder::new();
        let n0 = b.add_node(1.0, Aabb::new(Vec3::ZERO, Vec3::ONE));
        let n1 = b.add_node(0.0, Aabb::new(Vec3::ZERO, Vec3::splat(3.0)));
        b.add_arc(n0, n1, 1.0, []);
        let index = b.build().unwrap();
        let arc = index.arc(0).unwrap();
        assert_eq!(arc.fragments(), 0..0);
        assert_eq!(arc.bbox.max, Vec3::splat(3.0));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut b = IndexBuilder::new();
        let n0 = b.add_node(1.0, Aabb::new(Vec3::ZERO, Vec3::ONE));
        b.add_arc(n0, 5, 1.0, []);
        assert!(matches!(b.build(), Err(IndexError::ArcEndpoint { .. })));
    }

    #[test]
    fn test_empty_builder_produces_empty_index() {
        let index = IndexBuilder::new().build().unwrap();
        assert!(index.nodes().is_empty());
        assert!(index.roots().is_empty());
    }
}
