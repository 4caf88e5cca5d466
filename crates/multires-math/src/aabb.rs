use glam::Vec3;

use crate::box_distance::box_distance_3d;

/// Axis-aligned bounding box in single-precision world space.
///
/// [`Aabb::new`] sorts the corners so that `min <= max` on every axis.
/// Boxes decoded from disk are built field by field and keep their
/// components bit for bit, so they may violate that ordering when the
/// source did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create an AABB from two corners, sorting components per axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create an AABB from six floats in `[min_x, min_y, min_z, max_x, max_y, max_z]` order.
    pub fn from_array(values: [f32; 6]) -> Self {
        Self {
            min: Vec3::new(values[0], values[1], values[2]),
            max: Vec3::new(values[3], values[4], values[5]),
        }
    }

    /// The six floats of this box in the order accepted by [`Aabb::from_array`].
    pub fn to_array(&self) -> [f32; 6] {
        [
            self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z,
        ]
    }

    /// Returns true if the point lies inside or on the boundary.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Returns true if this AABB overlaps `other`, touching faces included.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Smallest AABB enclosing both boxes.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Size along each axis.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Longest edge of the box.
    pub fn max_side_length(&self) -> f32 {
        self.size().max_element()
    }

    /// The box with both z-coordinates multiplied by `z_scale`.
    ///
    /// A negative scale flips the z-range; the result is re-sorted so it stays
    /// a valid box.
    pub fn scale_z(&self, z_scale: f32) -> Aabb {
        let lo = self.min.z * z_scale;
        let hi = self.max.z * z_scale;
        Aabb {
            min: Vec3::new(self.min.x, self.min.y, lo.min(hi)),
            max: Vec3::new(self.max.x, self.max.y, lo.max(hi)),
        }
    }

    /// Shift the box by `offset`.
    pub fn translate(&self, offset: Vec3) -> Aabb {
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Minimum distance from `point` to this box, zero when inside.
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        box_distance_3d(self.min, self.max, point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(lo: f32, hi: f32) -> Aabb {
        Aabb::new(Vec3::splat(lo), Vec3::splat(hi))
    }

    #[test]
    fn test_constructor_auto_sorts() {
        let aabb = Aabb::new(Vec3::new(10.0, 0.0, 5.0), Vec3::new(0.0, 10.0, -5.0));
        assert_eq!(aabb.min, Vec3::new(0.0, 0.0, -5.0));
        assert_eq!(aabb.max, Vec3::new(10.0, 10.0, 5.0));
    }

    #[test]
    fn test_array_layout() {
        let aabb = Aabb::from_array([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(aabb.min, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.max, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(aabb.to_array(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_contains_point_on_edge() {
        let aabb = cube(0.0, 10.0);
        assert!(aabb.contains_point(Vec3::ZERO));
        assert!(aabb.contains_point(Vec3::splat(10.0)));
        assert!(aabb.contains_point(Vec3::new(10.0, 5.0, 5.0)));
        assert!(!aabb.contains_point(Vec3::new(10.5, 5.0, 5.0)));
    }

    #[test]
    fn test_intersects_touching() {
        let a = cube(0.0, 10.0);
        let b = Aabb::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&cube(20.0, 30.0)));
    }

    #[test]
    fn test_union_encloses_both() {
        let u = cube(0.0, 5.0).union(&cube(3.0, 10.0));
        assert_eq!(u, cube(0.0, 10.0));
    }

    #[test]
    fn test_scale_z_only_touches_z() {
        let aabb = Aabb::new(Vec3::new(0.0, 0.0, 2.0), Vec3::new(4.0, 8.0, 3.0));
        let scaled = aabb.scale_z(10.0);
        assert_eq!(scaled.min, Vec3::new(0.0, 0.0, 20.0));
        assert_eq!(scaled.max, Vec3::new(4.0, 8.0, 30.0));

        let flipped = aabb.scale_z(-1.0);
        assert_eq!(flipped.min.z, -3.0);
        assert_eq!(flipped.max.z, -2.0);
    }

    #[test]
    fn test_max_side_length() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::new(4.0, 9.0, 1.0));
        assert_eq!(aabb.max_side_length(), 9.0);
    }

    #[test]
    fn test_distance_to_point() {
        let aabb = cube(0.0, 10.0);
        assert_eq!(aabb.distance_to_point(Vec3::splat(5.0)), 0.0);
        assert!((aabb.distance_to_point(Vec3::new(5.0, 5.0, 12.0)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_translate_and_center() {
        let moved = cube(0.0, 2.0).translate(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(moved.center(), Vec3::new(2.0, 3.0, 4.0));
        assert_eq!(moved.size(), Vec3::splat(2.0));
    }
}
