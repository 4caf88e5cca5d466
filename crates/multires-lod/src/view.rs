//! Camera state consumed by the refinement criteria.

use glam::{Mat4, Vec3};
use multires_math::{Aabb, Frustum};

/// What a criterion needs to know about the current view.
///
/// Positions are in the same space as the scaled bounding boxes the
/// criterion tests, i.e. after vertical exaggeration.
pub trait ViewState {
    fn eye_position(&self) -> Vec3;

    /// Pixels covered by one world unit at `distance` from the eye.
    fn pixel_size_for_distance(&self, distance: f32) -> f32;

    fn frustum_intersects(&self, bbox: &Aabb) -> bool;
}

impl<V: ViewState + ?Sized> ViewState for &V {
    fn eye_position(&self) -> Vec3 {
        (**self).eye_position()
    }

    fn pixel_size_for_distance(&self, distance: f32) -> f32 {
        (**self).pixel_size_for_distance(distance)
    }

    fn frustum_intersects(&self, bbox: &Aabb) -> bool {
        (**self).frustum_intersects(bbox)
    }
}

/// Perspective camera: eye, frustum, vertical field of view and viewport height.
#[derive(Clone, Debug)]
pub struct ViewParams {
    eye: Vec3,
    frustum: Frustum,
    fov_y: f32,
    viewport_height: f32,
    near: f32,
}

impl ViewParams {
    /// Build from an eye position and a view-projection matrix with `[0, 1]` depth.
    pub fn new(eye: Vec3, view_projection: &Mat4, fov_y: f32, viewport_height: f32, near: f32) -> Self {
        Self {
            eye,
            frustum: Frustum::from_view_projection(view_projection),
            fov_y,
            viewport_height,
            near,
        }
    }

    /// Right-handed camera at `eye` looking at `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
        viewport_height: f32,
    ) -> Self {
        let view = Mat4::look_at_rh(eye, target, up);
        let projection = Mat4::perspective_rh(fov_y, aspect, near, far);
        Self::new(eye, &(projection * view), fov_y, viewport_height, near)
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    pub fn viewport_height(&self) -> f32 {
        self.viewport_height
    }
}

impl ViewState for ViewParams {
    fn eye_position(&self) -> Vec3 {
        self.eye
    }

    /// `viewport_height / (2 · d · tan(fov_y / 2))`, with `d` clamped to the near plane.
    fn pixel_size_for_distance(&self, distance: f32) -> f32 {
        let d = distance.max(self.near);
        self.viewport_height / (2.0 * d * (self.fov_y * 0.5).tan())
    }

    fn frustum_intersects(&self, bbox: &Aabb) -> bool {
        self.frustum.intersects(bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn camera() -> ViewParams {
        ViewParams::look_at(
            Vec3::ZERO,
            Vec3::NEG_Z,
            Vec3::Y,
            FRAC_PI_2,
            1.0,
            0.1,
            1000.0,
            1000.0,
        )
    }

    /// With a 90° field of view, tan(fov/2) = 1 and one unit at distance d
    /// covers height / (2d) pixels.
    #[test]
    fn test_pixel_size_for_distance() {
        let view = camera();
        assert!((view.pixel_size_for_distance(10.0) - 50.0).abs() < 1e-3);
        assert!((view.pixel_size_for_distance(100.0) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_pixel_size_clamped_at_near_plane() {
        let view = camera();
        let at_near = view.pixel_size_for_distance(0.1);
        assert_eq!(view.pixel_size_for_distance(0.0), at_near);
        assert!(at_near.is_finite());
    }

    #[test]
    fn test_frustum_intersects() {
        let view = camera();
        let ahead = Aabb::new(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0));
        let behind = Aabb::new(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(1.0, 1.0, 11.0));
        assert!(view.frustum_intersects(&ahead));
        assert!(!view.frustum_intersects(&behind));
        assert_eq!(view.eye_position(), Vec3::ZERO);
    }
}
