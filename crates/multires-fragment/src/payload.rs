//! Decoded geometry of one mesh fragment and its blob encoding.
//!
//! ## Binary Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Vertex count V (`u32`, little-endian) |
//! | 4 | 4 | Index count I (`u32`, little-endian) |
//! | 8 | 12·V | Positions (3 × `f32` per vertex) |
//! | 8+12·V | 12·V | Normals (3 × `f32` per vertex) |
//! | 8+24·V | I·w | Triangle indices, `w` given by [`IndexWidth::for_vertex_count`] |

use std::sync::Arc;

use crate::error::FragmentError;

/// Size of the payload header in bytes.
pub const PAYLOAD_HEADER_SIZE: usize = 8;

/// Storage width of triangle indices in a blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexWidth {
    U8,
    U16,
    U32,
}

impl IndexWidth {
    /// The narrowest width able to address `vertex_count` vertices.
    pub fn for_vertex_count(vertex_count: u32) -> Self {
        if vertex_count <= 1 << 8 {
            IndexWidth::U8
        } else if vertex_count <= 1 << 16 {
            IndexWidth::U16
        } else {
            IndexWidth::U32
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            IndexWidth::U8 => 1,
            IndexWidth::U16 => 2,
            IndexWidth::U32 => 4,
        }
    }
}

/// Vertex positions, normals and triangle indices of a loaded fragment.
///
/// Buffers are reference counted so callers can hold on to them after the
/// owning store unloads the fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentPayload {
    pub vertices: Arc<[[f32; 3]]>,
    pub normals: Arc<[[f32; 3]]>,
    pub indices: Arc<[u32]>,
}

impl FragmentPayload {
    pub fn new(vertices: Vec<[f32; 3]>, normals: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            vertices: vertices.into(),
            normals: normals.into(),
            indices: indices.into(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles: index count / 3.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Resident memory of the three buffers.
    pub fn byte_size(&self) -> usize {
        self.vertex_bytes().len() + self.normal_bytes().len() + self.index_bytes().len()
    }

    /// Positions as raw bytes, ready for a GPU vertex buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices[..])
    }

    /// Normals as raw bytes.
    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals[..])
    }

    /// Indices as raw `u32` bytes.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices[..])
    }

    /// Encode into the blob layout.
    pub fn encode(&self) -> Vec<u8> {
        let vertex_count = self.vertices.len() as u32;
        let width = IndexWidth::for_vertex_count(vertex_count);
        let mut buf = Vec::with_capacity(
            PAYLOAD_HEADER_SIZE + self.vertices.len() * 24 + self.indices.len() * width.bytes(),
        );

        buf.extend_from_slice(&vertex_count.to_le_bytes());
        buf.extend_from_slice(&(self.indices.len() as u32).to_le_bytes());
        for v in self.vertices.iter().chain(self.normals.iter()) {
            for c in v {
                buf.extend_from_slice(&c.to_le_bytes());
            }
        }
        for &i in self.indices.iter() {
            match width {
                IndexWidth::U8 => buf.push(i as u8),
                IndexWidth::U16 => buf.extend_from_slice(&(i as u16).to_le_bytes()),
                IndexWidth::U32 => buf.extend_from_slice(&i.to_le_bytes()),
            }
        }
        buf
    }

    /// Decode a blob range. The range must hold exactly one payload.
    pub fn decode(data: &[u8]) -> Result<Self, FragmentError> {
        if data.len() < PAYLOAD_HEADER_SIZE {
            return Err(FragmentError::MalformedPayload {
                expected: PAYLOAD_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let vertex_count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let index_count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let width = IndexWidth::for_vertex_count(vertex_count);

        let expected = (vertex_count as usize)
            .checked_mul(24)
            .and_then(|v| (index_count as usize).checked_mul(width.bytes()).map(|i| (v, i)))
            .and_then(|(v, i)| v.checked_add(i))
            .and_then(|n| n.checked_add(PAYLOAD_HEADER_SIZE))
            .unwrap_or(usize::MAX);
        if data.len() != expected {
            return Err(FragmentError::MalformedPayload {
                expected,
                actual: data.len(),
            });
        }

        let read_vec3s = |start: usize| -> Vec<[f32; 3]> {
            data[start..start + vertex_count as usize * 12]
                .chunks_exact(12)
                .map(|c| {
                    let f = |o: usize| f32::from_le_bytes([c[o], c[o + 1], c[o + 2], c[o + 3]]);
                    [f(0), f(4), f(8)]
                })
                .collect()
        };
        let vertices = read_vec3s(PAYLOAD_HEADER_SIZE);
        let normals = read_vec3s(PAYLOAD_HEADER_SIZE + vertex_count as usize * 12);

        let index_start = PAYLOAD_HEADER_SIZE + vertex_count as usize * 24;
        let index_data = &data[index_start..];
        let indices: Vec<u32> = match width {
            IndexWidth::U8 => index_data.iter().map(|&b| b as u32).collect(),
            IndexWidth::U16 => index_data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32)
                .collect(),
            IndexWidth::U32 => index_data
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        };

        if let Some(&bad) = indices.iter().find(|&&i| i >= vertex_count) {
            return Err(FragmentError::IndexOutOfRange {
                index: bad,
                vertex_count,
            });
        }

        Ok(Self::new(vertices, normals, indices))
    }
}
