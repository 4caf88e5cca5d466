//! Synthetic quadtree terrain for trying the tool without real data.
//!
//! Every tile is one fragment sampled from the same height field. A tile's
//! arc starts at the node that introduces it (the root, or the node applying
//! its parent) and ends at the node replacing it by its four children; tiles
//! of the finest level end in a shared drain node.

use std::path::Path;

use glam::{Vec2, Vec3};
use multires_fragment::FragmentPayload;
use multires_index::{FragmentSpec, IndexBuilder, IndexError, MultiresIndex};
use multires_math::Aabb;

/// Vertices per tile edge.
const TILE_RESOLUTION: usize = 9;

struct TerrainBuilder {
    builder: IndexBuilder,
    blob: Vec<u8>,
    size: f32,
    depth: u32,
    drain: u32,
}

impl TerrainBuilder {
    fn amplitude(&self) -> f32 {
        self.size * 0.05
    }

    fn frequency(&self) -> f32 {
        std::f32::consts::TAU * 2.0 / self.size
    }

    fn height(&self, p: Vec2) -> f32 {
        let f = self.frequency();
        self.amplitude() * (p.x * f).sin() * (p.y * f).cos()
    }

    fn normal(&self, p: Vec2) -> [f32; 3] {
        let (a, f) = (self.amplitude(), self.frequency());
        let dx = a * f * (p.x * f).cos() * (p.y * f).cos();
        let dy = -a * f * (p.x * f).sin() * (p.y * f).sin();
        Vec3::new(-dx, -dy, 1.0).normalize().to_array()
    }

    /// Sample one tile and append its payload to the blob.
    fn tile_fragment(&mut self, origin: Vec2, extent: f32) -> FragmentSpec {
        let n = TILE_RESOLUTION;
        let step = extent / (n - 1) as f32;
        let mut vertices = Vec::with_capacity(n * n);
        let mut normals = Vec::with_capacity(n * n);
        for j in 0..n {
            for i in 0..n {
                let p = origin + Vec2::new(i as f32, j as f32) * step;
                vertices.push([p.x, p.y, self.height(p)]);
                normals.push(self.normal(p));
            }
        }
        let mut indices = Vec::with_capacity((n - 1) * (n - 1) * 6);
        for j in 0..n - 1 {
            for i in 0..n - 1 {
                let v = (j * n + i) as u32;
                let row = n as u32;
                indices.extend_from_slice(&[v, v + 1, v + row + 1, v, v + row + 1, v + row]);
            }
        }

        let bbox = vertices
            .iter()
            .map(|&v| Vec3::from_array(v))
            .fold(
                Aabb {
                    min: Vec3::splat(f32::MAX),
                    max: Vec3::splat(f32::MIN),
                },
                |b, v| Aabb {
                    min: b.min.min(v),
                    max: b.max.max(v),
                },
            );

        let bytes = FragmentPayload::new(vertices, normals, indices).encode();
        let spec = FragmentSpec {
            bbox,
            error: self.tile_error(extent),
            blob_position: self.blob.len() as i64,
            length: bytes.len() as i32,
        };
        self.blob.extend_from_slice(&bytes);
        spec
    }

    /// Rough approximation error of a tile: the height-field amplitude scaled
    /// by the tile's share of one wavelength.
    fn tile_error(&self, extent: f32) -> f32 {
        let spacing = extent / (TILE_RESOLUTION - 1) as f32;
        (self.amplitude() * spacing * self.frequency()).min(self.amplitude() * 2.0)
    }

    fn add_tile(&mut self, source: u32, origin: Vec2, extent: f32, level: u32) {
        let spec = self.tile_fragment(origin, extent);
        if level == self.depth {
            self.builder.add_arc(source, self.drain, 0.0, [spec]);
            return;
        }

        let half = extent * 0.5;
        let node = self.builder.add_node(self.tile_error(half), spec.bbox);
        self.builder.add_arc(source, node, spec.error, [spec]);
        for (dx, dy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
            self.add_tile(node, origin + Vec2::new(dx, dy) * half, half, level + 1);
        }
    }
}

/// Build a terrain of `size` × `size` units refined over `depth` levels.
/// Returns the index and the matching blob bytes.
pub fn build_sample(size: f32, depth: u32) -> Result<(MultiresIndex, Vec<u8>), IndexError> {
    let mut builder = IndexBuilder::new();
    let bounds = Aabb::new(Vec3::ZERO, Vec3::new(size, size, 0.0));
    let root = builder.add_node(size, bounds);
    let drain = builder.add_node(0.0, bounds);

    let mut terrain = TerrainBuilder {
        builder,
        blob: Vec::new(),
        size,
        depth,
        drain,
    };
    terrain.add_tile(root, Vec2::ZERO, size, 0);
    let index = terrain.builder.build()?;
    Ok((index, terrain.blob))
}

/// Write a sample index and blob to disk.
pub fn write_sample(
    index_path: &Path,
    blob_path: &Path,
    size: f32,
    depth: u32,
) -> Result<MultiresIndex, IndexError> {
    let (index, blob) = build_sample(size, depth)?;
    index.save(index_path)?;
    std::fs::write(blob_path, blob)?;
    Ok(index)
}
