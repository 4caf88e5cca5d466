//! Bounding boxes, box-to-point distances and view-frustum tests for multiresolution meshes.

mod aabb;
mod box_distance;
mod frustum;

pub use aabb::Aabb;
pub use box_distance::{
    Real, box_distance, box_distance_2d, box_distance_2d_f64, box_distance_3d, box_distance_3d_f64,
};
pub use frustum::Frustum;
