//! Fixed-size binary records of the MRMI (multiresolution mesh index) format.
//!
//! ## Binary Layout
//!
//! All values are little-endian.
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `"MRMI"` |
//! | 4 | 4 | Format version (`u32`, currently 1) |
//! | 8 | 4 | Node count (`u32`) |
//! | 12 | 4 | Arc count (`u32`) |
//! | 16 | 4 | Fragment count (`u32`) |
//! | 20 | 24 | Mesh bounding box (6 × `f32`) |
//! | 44 | 40·N | Node table ([`DagNode`]) |
//! | … | 48·A | Arc table ([`DagArc`]) |
//! | … | 40·F | Fragment table ([`FragmentHeader`]) |
//!
//! Id-valued `i32` fields use [`NO_ID`] (-1) for "none". Ranges are inclusive;
//! an empty range is `-1..=-1`.

use std::ops::Range;

use glam::Vec3;
use multires_math::Aabb;

use crate::error::IndexError;

/// Magic bytes identifying the MRMI format.
pub const MAGIC: [u8; 4] = *b"MRMI";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = 44;

/// Size of one node record in bytes.
pub const NODE_RECORD_SIZE: usize = 40;

/// Size of one arc record in bytes.
pub const ARC_RECORD_SIZE: usize = 48;

/// Size of one fragment record in bytes.
pub const FRAGMENT_RECORD_SIZE: usize = 40;

/// Sentinel for an absent id.
pub const NO_ID: i32 = -1;

/// Bounds-checked slice of exactly `size` bytes starting at `offset`.
fn record_bytes(buf: &[u8], offset: usize, size: usize) -> Result<&[u8], IndexError> {
    let end = offset.checked_add(size).ok_or(IndexError::Truncated {
        expected: usize::MAX,
        actual: buf.len(),
    })?;
    buf.get(offset..end).ok_or(IndexError::Truncated {
        expected: end,
        actual: buf.len(),
    })
}

fn record_bytes_mut(buf: &mut [u8], offset: usize, size: usize) -> Result<&mut [u8], IndexError> {
    let actual = buf.len();
    let end = offset.checked_add(size).ok_or(IndexError::Truncated {
        expected: usize::MAX,
        actual,
    })?;
    buf.get_mut(offset..end).ok_or(IndexError::Truncated {
        expected: end,
        actual,
    })
}

/// Sequential little-endian field reader over one validated record.
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_bits(self.u32())
    }

    fn aabb(&mut self) -> Aabb {
        let mut values = [0.0f32; 6];
        for v in &mut values {
            *v = self.f32();
        }
        Aabb::from_array(values)
    }
}

/// Sequential little-endian field writer over one validated record.
struct FieldWriter<'a> {
    bytes: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn put(&mut self, data: &[u8]) {
        self.bytes[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.put(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.u32(v.to_bits());
    }

    fn aabb(&mut self, aabb: &Aabb) {
        for v in aabb.to_array() {
            self.f32(v);
        }
    }
}

/// Inclusive `i32` id range to a half-open `u32` range; empty for sentinels.
fn id_range(lowest: i32, highest: i32) -> Range<u32> {
    if lowest < 0 || highest < lowest {
        0..0
    } else {
        lowest as u32..highest as u32 + 1
    }
}

/// File header of an MRMI index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexHeader {
    pub version: u32,
    pub node_count: u32,
    pub arc_count: u32,
    pub fragment_count: u32,
    /// Bounding box of the whole mesh.
    pub bbox: Aabb,
}

impl IndexHeader {
    /// Decode the header at the start of `buf`.
    pub fn load(buf: &[u8]) -> Result<Self, IndexError> {
        if buf.len() < MAGIC.len() || buf[..MAGIC.len()] != MAGIC {
            return Err(IndexError::InvalidMagic);
        }
        let bytes = record_bytes(buf, 0, HEADER_SIZE)?;
        let mut r = FieldReader::new(&bytes[MAGIC.len()..]);
        let version = r.u32();
        if version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            node_count: r.u32(),
            arc_count: r.u32(),
            fragment_count: r.u32(),
            bbox: r.aabb(),
        })
    }

    /// Encode the header into the first [`HEADER_SIZE`] bytes of `target`.
    pub fn store(&self, target: &mut [u8]) -> Result<(), IndexError> {
        let bytes = record_bytes_mut(target, 0, HEADER_SIZE)?;
        let mut w = FieldWriter::new(bytes);
        w.put(&MAGIC);
        w.u32(self.version);
        w.u32(self.node_count);
        w.u32(self.arc_count);
        w.u32(self.fragment_count);
        w.aabb(&self.bbox);
        Ok(())
    }

    /// Total byte length of an index described by this header.
    pub fn total_size(&self) -> usize {
        HEADER_SIZE
            + self.node_count as usize * NODE_RECORD_SIZE
            + self.arc_count as usize * ARC_RECORD_SIZE
            + self.fragment_count as usize * FRAGMENT_RECORD_SIZE
    }

    pub fn node_table_offset(&self) -> usize {
        HEADER_SIZE
    }

    pub fn arc_table_offset(&self) -> usize {
        self.node_table_offset() + self.node_count as usize * NODE_RECORD_SIZE
    }

    pub fn fragment_table_offset(&self) -> usize {
        self.arc_table_offset() + self.arc_count as usize * ARC_RECORD_SIZE
    }
}

/// A vertex of the refinement DAG.
///
/// Wire layout (40 bytes): lowest outgoing arc, highest outgoing arc, lowest
/// incoming arc (3 × `i32`), geometry error (`f32`), bbox (6 × `f32`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DagNode {
    /// Dense id, equal to the record's position in the node table.
    pub id: u32,
    pub lowest_outgoing_arc: i32,
    pub highest_outgoing_arc: i32,
    /// Head of the incoming arc chain, [`NO_ID`] for roots.
    pub lowest_incoming_arc: i32,
    /// Worst-case approximation error of the geometry around this node.
    pub geometry_error: f32,
    pub bbox: Aabb,
}

impl DagNode {
    /// Decode the node record at `offset`.
    pub fn load(buf: &[u8], offset: usize, id: u32) -> Result<Self, IndexError> {
        let mut r = FieldReader::new(record_bytes(buf, offset, NODE_RECORD_SIZE)?);
        Ok(Self {
            id,
            lowest_outgoing_arc: r.i32(),
            highest_outgoing_arc: r.i32(),
            lowest_incoming_arc: r.i32(),
            geometry_error: r.f32(),
            bbox: r.aabb(),
        })
    }

    /// Encode this node into `target` at `offset`, in the order [`DagNode::load`] reads.
    pub fn store(&self, target: &mut [u8], offset: usize) -> Result<(), IndexError> {
        let mut w = FieldWriter::new(record_bytes_mut(target, offset, NODE_RECORD_SIZE)?);
        w.i32(self.lowest_outgoing_arc);
        w.i32(self.highest_outgoing_arc);
        w.i32(self.lowest_incoming_arc);
        w.f32(self.geometry_error);
        w.aabb(&self.bbox);
        Ok(())
    }

    /// Ids of the arcs leaving this node.
    pub fn outgoing_arcs(&self) -> Range<u32> {
        id_range(self.lowest_outgoing_arc, self.highest_outgoing_arc)
    }

    /// True for nodes without incoming arcs.
    pub fn is_root(&self) -> bool {
        self.lowest_incoming_arc < 0
    }

    /// True for nodes without outgoing arcs: the finest available level.
    pub fn is_leaf(&self) -> bool {
        self.outgoing_arcs().is_empty()
    }
}

/// A refinement arc: the fragments that appear when its source node has been
/// applied and disappear once its destination node is.
///
/// Wire layout (48 bytes): source node, destination node, next arc with the
/// same destination, lowest fragment, highest fragment (5 × `i32`),
/// geometric error (`f32`), bbox (6 × `f32`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DagArc {
    pub id: u32,
    pub source_node: i32,
    pub destination_node: i32,
    /// Next link in the destination's incoming chain, [`NO_ID`] at the end.
    pub next_arc_with_same_destination: i32,
    pub lowest_fragment: i32,
    pub highest_fragment: i32,
    pub geometric_error: f32,
    /// Union of the bounding boxes of the arc's fragments.
    pub bbox: Aabb,
}

impl DagArc {
    /// Decode the arc record at `offset`.
    pub fn load(buf: &[u8], offset: usize, id: u32) -> Result<Self, IndexError> {
        let mut r = FieldReader::new(record_bytes(buf, offset, ARC_RECORD_SIZE)?);
        Ok(Self {
            id,
            source_node: r.i32(),
            destination_node: r.i32(),
            next_arc_with_same_destination: r.i32(),
            lowest_fragment: r.i32(),
            highest_fragment: r.i32(),
            geometric_error: r.f32(),
            bbox: r.aabb(),
        })
    }

    /// Encode this arc into `target` at `offset`, in the order [`DagArc::load`] reads.
    pub fn store(&self, target: &mut [u8], offset: usize) -> Result<(), IndexError> {
        let mut w = FieldWriter::new(record_bytes_mut(target, offset, ARC_RECORD_SIZE)?);
        w.i32(self.source_node);
        w.i32(self.destination_node);
        w.i32(self.next_arc_with_same_destination);
        w.i32(self.lowest_fragment);
        w.i32(self.highest_fragment);
        w.f32(self.geometric_error);
        w.aabb(&self.bbox);
        Ok(())
    }

    /// Ids of the fragments this arc contributes.
    pub fn fragments(&self) -> Range<u32> {
        id_range(self.lowest_fragment, self.highest_fragment)
    }

    /// Source node id; only meaningful on a validated index.
    pub fn source(&self) -> u32 {
        self.source_node as u32
    }

    /// Destination node id; only meaningful on a validated index.
    pub fn destination(&self) -> u32 {
        self.destination_node as u32
    }
}

/// Header of one loadable unit of triangle geometry.
///
/// Wire layout (40 bytes): bbox (6 × `f32`), error (`f32`), blob position
/// (`i64`), length (`i32`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FragmentHeader {
    pub id: u32,
    pub bbox: Aabb,
    pub error: f32,
    /// Byte offset of the payload in the blob store.
    pub blob_position: i64,
    /// Byte length of the payload in the blob store.
    pub length: i32,
}

impl FragmentHeader {
    /// Decode the fragment record at `offset`.
    pub fn load(buf: &[u8], offset: usize, id: u32) -> Result<Self, IndexError> {
        let mut r = FieldReader::new(record_bytes(buf, offset, FRAGMENT_RECORD_SIZE)?);
        Ok(Self {
            id,
            bbox: r.aabb(),
            error: r.f32(),
            blob_position: r.i64(),
            length: r.i32(),
        })
    }

    /// Encode this header into `target` at `offset`, in the order
    /// [`FragmentHeader::load`] reads.
    pub fn store(&self, target: &mut [u8], offset: usize) -> Result<(), IndexError> {
        let mut w = FieldWriter::new(record_bytes_mut(target, offset, FRAGMENT_RECORD_SIZE)?);
        w.aabb(&self.bbox);
        w.f32(self.error);
        w.i64(self.blob_position);
        w.i32(self.length);
        Ok(())
    }

    /// The blob range as unsigned offset and length. `None` when either is negative.
    pub fn blob_range(&self) -> Option<(u64, u32)> {
        let position = u64::try_from(self.blob_position).ok()?;
        let length = u32::try_from(self.length).ok()?;
        Some((position, length))
    }

    /// Center of the fragment's bounding box.
    pub fn center(&self) -> Vec3 {
        self.bbox.center()
    }
}
