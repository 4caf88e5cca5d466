//! View frustum extracted from a view-projection matrix, tested against [`Aabb`]s.

use glam::{Mat4, Vec3, Vec4};

use crate::Aabb;

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// A view frustum defined by six inward-pointing planes.
#[derive(Clone, Debug)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far. Each `Vec4(a, b, c, d)` holds the
    /// normalized inward normal and the signed distance term.
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract the planes of a view-projection matrix with a `[0, 1]` depth
    /// range (the convention of `Mat4::perspective_rh`).
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [Vec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    /// Test whether an AABB is at least partially inside the frustum.
    ///
    /// Positive-vertex test: conservative near frustum corners, where boxes
    /// just outside may still report `true`. Visible boxes never report `false`.
    pub fn intersects(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let p = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            normal.dot(p) + plane.w >= 0.0
        })
    }

    /// Test whether a point is inside the frustum.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Camera at the origin looking down -Z, 90° vertical FOV, square viewport.
    fn looking_down_neg_z() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 1000.0);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_box_in_front_is_visible() {
        let frustum = looking_down_neg_z();
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0));
        assert!(frustum.intersects(&aabb));
    }

    #[test]
    fn test_box_behind_is_culled() {
        let frustum = looking_down_neg_z();
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(1.0, 1.0, 11.0));
        assert!(!frustum.intersects(&aabb));
    }

    #[test]
    fn test_box_beyond_far_plane_is_culled() {
        let frustum = looking_down_neg_z();
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -2001.0), Vec3::new(1.0, 1.0, -1999.0));
        assert!(!frustum.intersects(&aabb));
    }

    #[test]
    fn test_box_far_to_the_side_is_culled() {
        let frustum = looking_down_neg_z();
        let aabb = Aabb::new(Vec3::new(50.0, -1.0, -11.0), Vec3::new(52.0, 1.0, -9.0));
        assert!(!frustum.intersects(&aabb));
    }

    #[test]
    fn test_box_straddling_a_plane_is_visible() {
        let frustum = looking_down_neg_z();
        // Side planes at 45°: at z = -10 the frustum spans x in [-10, 10].
        let aabb = Aabb::new(Vec3::new(8.0, -1.0, -11.0), Vec3::new(14.0, 1.0, -9.0));
        assert!(frustum.intersects(&aabb));
    }

    #[test]
    fn test_contains_point() {
        let frustum = looking_down_neg_z();
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -5.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 5.0)));
    }
}
