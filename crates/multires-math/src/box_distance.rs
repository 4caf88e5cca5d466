//! Minimum distance between an axis-aligned box and a point.
//!
//! The distance is taken face by face: every bounding face of the box is
//! clamped towards the point, and the smallest Euclidean distance over all
//! faces wins. Points inside or on the box are at distance zero.
//!
//! All functions are pure and work on fixed-size arrays; nothing allocates.

use std::ops::{Add, Mul, Sub};

use glam::{DVec2, DVec3, Vec2, Vec3};

/// Floating-point scalar usable by [`box_distance`].
pub trait Real: Copy + PartialOrd + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> {
    /// Additive identity.
    const ZERO: Self;

    /// Square root.
    fn sqrt(self) -> Self;
}

impl Real for f32 {
    const ZERO: Self = 0.0;

    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }
}

impl Real for f64 {
    const ZERO: Self = 0.0;

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}

fn clamp<T: Real>(value: T, lo: T, hi: T) -> T {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

/// Distance from `point` to the box `[min, max]` in `N` dimensions.
///
/// Returns zero when the point lies inside or on the box. A NaN coordinate
/// yields NaN.
pub fn box_distance<T: Real, const N: usize>(min: [T; N], max: [T; N], point: [T; N]) -> T {
    let inside = (0..N).all(|i| point[i] >= min[i] && point[i] <= max[i]);
    if inside {
        return T::ZERO;
    }

    let mut best: Option<T> = None;
    for axis in 0..N {
        for plane in [min[axis], max[axis]] {
            let mut squared = T::ZERO;
            for i in 0..N {
                let closest = if i == axis {
                    plane
                } else {
                    clamp(point[i], min[i], max[i])
                };
                let d = point[i] - closest;
                squared = squared + d * d;
            }
            // NaN never compares smaller, so the first candidate sticks.
            if best.is_none_or(|b| squared < b) {
                best = Some(squared);
            }
        }
    }

    best.map_or(T::ZERO, T::sqrt)
}

/// Distance from a point to a 2D box, single precision.
pub fn box_distance_2d(min: Vec2, max: Vec2, point: Vec2) -> f32 {
    box_distance(min.to_array(), max.to_array(), point.to_array())
}

/// Distance from a point to a 2D box, double precision.
pub fn box_distance_2d_f64(min: DVec2, max: DVec2, point: DVec2) -> f64 {
    box_distance(min.to_array(), max.to_array(), point.to_array())
}

/// Distance from a point to a 3D box, single precision.
pub fn box_distance_3d(min: Vec3, max: Vec3, point: Vec3) -> f32 {
    box_distance(min.to_array(), max.to_array(), point.to_array())
}

/// Distance from a point to a 3D box, double precision.
pub fn box_distance_3d_f64(min: DVec3, max: DVec3, point: DVec3) -> f64 {
    box_distance(min.to_array(), max.to_array(), point.to_array())
}
