//! Refinement policies: decide whether an arc's coarse level is still
//! adequate for the current view.

use std::fmt;
use std::sync::Arc;

use glam::Vec3;
use multires_index::ArcRef;
use multires_math::Aabb;
use tracing::warn;

use crate::error::CriterionError;
use crate::texture::TextureResolutionRegistry;
use crate::view::ViewState;

/// Smallest texture resolution used when dividing by a registry match.
const MIN_RESOLUTION: f32 = 1e-5;

/// Tunables of [`ViewFrustumCriterion`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodSettings {
    /// Largest tolerated projected geometric error, in pixels.
    pub max_pixel_error: f32,
    /// Vertical exaggeration applied to bounding-box z before any test.
    pub z_scale: f32,
    /// Largest texture edge, in texels, a single fragment may require.
    pub max_texture_size: u32,
    /// Desired texel size on screen, in pixels.
    pub max_projected_texel_size: f32,
}

impl Default for LodSettings {
    fn default() -> Self {
        Self {
            max_pixel_error: 5.0,
            z_scale: 1.0,
            max_texture_size: 4096,
            max_projected_texel_size: 1.0,
        }
    }
}

/// View-, error- and texture-budget-aware refinement policy.
///
/// An arc needs refinement when, checked in this order:
/// 1. its scaled box lies outside the view frustum,
/// 2. its geometric error projects to more than `max_pixel_error` pixels, or
/// 3. any of its fragments would need a texture larger than `max_texture_size`
///    at the resolution the registries offer for its on-screen size.
#[derive(Clone)]
pub struct ViewFrustumCriterion {
    settings: LodSettings,
    registries: Vec<Arc<dyn TextureResolutionRegistry>>,
}

impl fmt::Debug for ViewFrustumCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewFrustumCriterion")
            .field("settings", &self.settings)
            .field("registries", &self.registries.len())
            .finish()
    }
}

impl ViewFrustumCriterion {
    pub fn new(settings: LodSettings) -> Self {
        Self {
            settings,
            registries: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn TextureResolutionRegistry>) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn settings(&self) -> &LodSettings {
        &self.settings
    }

    fn projection<V: ViewState + ?Sized>(
        &self,
        view: &V,
        bbox: &Aabb,
        eye: Vec3,
    ) -> Result<f32, CriterionError> {
        let distance = bbox.distance_to_point(eye);
        let factor = view.pixel_size_for_distance(distance);
        if !factor.is_finite() {
            return Err(CriterionError::NonFiniteProjection { distance, factor });
        }
        Ok(factor)
    }

    /// Finest positive resolution any registry offers, floored at
    /// [`MIN_RESOLUTION`]. `None` when no registry matches.
    fn texture_resolution(&self, meters_per_pixel: f32) -> Result<Option<f32>, CriterionError> {
        let mut best: Option<f32> = None;
        for registry in &self.registries {
            if let Some(resolution) = registry.matching_resolution(meters_per_pixel)?
                && resolution > 0.0
            {
                best = Some(best.map_or(resolution, |b| b.min(resolution)));
            }
        }
        Ok(best.map(|r| r.max(MIN_RESOLUTION)))
    }

    pub fn evaluate<V: ViewState + ?Sized>(
        &self,
        arc: ArcRef<'_>,
        view: &V,
    ) -> Result<bool, CriterionError> {
        let s = &self.settings;
        let bbox = arc.arc.bbox.scale_z(s.z_scale);

        // Outside the frustum counts as needing refinement.
        if !view.frustum_intersects(&bbox) {
            return Ok(true);
        }

        let eye = view.eye_position();
        let screen_error = self.projection(view, &bbox, eye)? * arc.arc.geometric_error;
        if screen_error > s.max_pixel_error {
            return Ok(true);
        }

        for fragment in arc.fragments {
            let scaled = fragment.bbox.scale_z(s.z_scale);
            let meters_per_pixel = s.max_projected_texel_size / self.projection(view, &scaled, eye)?;
            let Some(resolution) = self.texture_resolution(meters_per_pixel)? else {
                continue;
            };
            let required_texture_size = fragment.bbox.max_side_length() / resolution;
            if required_texture_size > s.max_texture_size as f32 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// The closed set of refinement policies.
#[derive(Clone, Debug)]
pub enum LodCriterion {
    /// Never refine: extracts the coarsest consistent cut.
    Coarsest,
    ViewFrustum(ViewFrustumCriterion),
}

impl LodCriterion {
    /// Whether `arc` should be replaced by finer arcs.
    ///
    /// Evaluation failures are logged and answered with `false`, so the
    /// coarser level keeps being shown.
    pub fn needs_refinement<V: ViewState + ?Sized>(&self, arc: ArcRef<'_>, view: &V) -> bool {
        match self.try_needs_refinement(arc, view) {
            Ok(refine) => refine,
            Err(err) => {
                warn!(arc = arc.id(), error = %err, "criterion evaluation failed");
                false
            }
        }
    }

    pub fn try_needs_refinement<V: ViewState + ?Sized>(
        &self,
        arc: ArcRef<'_>,
        view: &V,
    ) -> Result<bool, CriterionError> {
        match self {
            LodCriterion::Coarsest => Ok(false),
            LodCriterion::ViewFrustum(criterion) => criterion.evaluate(arc, view),
        }
    }
}

impl From<ViewFrustumCriterion> for LodCriterion {
    fn from(criterion: ViewFrustumCriterion) -> Self {
        LodCriterion::ViewFrustum(criterion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::ResolutionLadder;
    use multires_index::{DagArc, FragmentHeader};
    use std::cell::Cell;

    /// View with a fixed pixel size that counts every callback.
    struct ProbeView {
        eye: Vec3,
        pixel_size: f32,
        visible: bool,
        frustum_checks: Cell<u32>,
        projections: Cell<u32>,
    }

    impl ProbeView {
        fn new(pixel_size: f32, visible: bool) -> Self {
            Self {
                eye: Vec3::new(0.0, 0.0, 100.0),
                pixel_size,
                visible,
                frustum_checks: Cell::new(0),
                projections: Cell::new(0),
            }
        }
    }

    impl ViewState for ProbeView {
        fn eye_position(&self) -> Vec3 {
            self.eye
        }

        fn pixel_size_for_distance(&self, _distance: f32) -> f32 {
            self.projections.set(self.projections.get() + 1);
            self.pixel_size
        }

        fn frustum_intersects(&self, _bbox: &Aabb) -> bool {
            self.frustum_checks.set(self.frustum_checks.get() + 1);
            self.visible
        }
    }

    struct BrokenRegistry;

    impl TextureResolutionRegistry for BrokenRegistry {
        fn matching_resolution(&self, meters_per_pixel: f32) -> Result<Option<f32>, CriterionError> {
            Err(CriterionError::Registry {
                meters_per_pixel,
                message: "catalog offline".into(),
            })
        }
    }

    fn cube(size: f32) -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::splat(size))
    }

    fn arc(geometric_error: f32, bbox: Aabb) -> DagArc {
        DagArc {
            id: 3,
            source_node: 0,
            destination_node: 1,
            next_arc_with_same_destination: -1,
            lowest_fragment: 0,
            highest_fragment: 0,
            geometric_error,
            bbox,
        }
    }

    fn fragment(bbox: Aabb) -> FragmentHeader {
        FragmentHeader {
            id: 0,
            bbox,
            error: 0.0,
            blob_position: 0,
            length: 0,
        }
    }

    fn criterion(max_pixel_error: f32) -> ViewFrustumCriterion {
        ViewFrustumCriterion::new(LodSettings {
            max_pixel_error,
            ..LodSettings::default()
        })
    }

    #[test]
    fn test_coarsest_never_refines() {
        let view = ProbeView::new(1e6, false);
        let a = arc(1e9, cube(1.0));
        let fragments = [fragment(cube(1.0))];
        let arc_ref = ArcRef {
            arc: &a,
            fragments: &fragments,
        };
        assert!(!LodCriterion::Coarsest.needs_refinement(arc_ref, &view));
        assert_eq!(view.frustum_checks.get(), 0);
    }

    /// With an infinite pixel budget and everything visible, nothing refines.
    #[test]
    fn test_infinite_pixel_error_never_refines() {
        let view = ProbeView::new(1e6, true);
        let lod = LodCriterion::from(criterion(f32::INFINITY));
        for error in [0.0, 1.0, 1e6, f32::MAX] {
            let a = arc(error, cube(10.0));
            let arc_ref = ArcRef {
                arc: &a,
                fragments: &[],
            };
            assert!(!lod.needs_refinement(arc_ref, &view));
        }
    }

    /// An arc outside the frustum refines before any projection is computed.
    #[test]
    fn test_outside_frustum_refines_first() {
        let view = ProbeView::new(1.0, false);
        let a = arc(0.0, cube(1.0));
        let fragments = [fragment(cube(1.0))];
        let lod = LodCriterion::from(criterion(5.0));
        let arc_ref = ArcRef {
            arc: &a,
            fragments: &fragments,
        };
        assert!(lod.needs_refinement(arc_ref, &view));
        assert_eq!(view.frustum_checks.get(), 1);
        assert_eq!(view.projections.get(), 0);
    }

    #[test]
    fn test_screen_error_threshold() {
        let view = ProbeView::new(10.0, true);
        let lod = LodCriterion::from(criterion(5.0));

        let coarse = arc(0.6, cube(1.0));
        let fine = arc(0.4, cube(1.0));
        assert!(lod.needs_refinement(
            ArcRef {
                arc: &coarse,
                fragments: &[]
            },
            &view
        ));
        assert!(!lod.needs_refinement(
            ArcRef {
                arc: &fine,
                fragments: &[]
            },
            &view
        ));
    }

    /// A fragment needing more texels than allowed forces refinement.
    #[test]
    fn test_texture_size_limit() {
        // 1 px per unit, 1 texel per px: 1 m/px requested, ladder answers 1.0.
        let view = ProbeView::new(1.0, true);
        let settings = LodSettings {
            max_pixel_error: f32::INFINITY,
            max_texture_size: 64,
            ..LodSettings::default()
        };
        let lod = LodCriterion::from(
            ViewFrustumCriterion::new(settings)
                .with_registry(Arc::new(ResolutionLadder::new([1.0, 4.0]))),
        );

        let small = [fragment(cube(32.0))];
        let large = [fragment(cube(100.0))];
        let a = arc(0.0, cube(100.0));
        assert!(!lod.needs_refinement(
            ArcRef {
                arc: &a,
                fragments: &small
            },
            &view
        ));
        assert!(lod.needs_refinement(
            ArcRef {
                arc: &a,
                fragments: &large
            },
            &view
        ));
    }

    /// Without any matching registry the texture check is skipped.
    #[test]
    fn test_no_registry_match_skips_texture_check() {
        let view = ProbeView::new(1.0, true);
        let settings = LodSettings {
            max_pixel_error: f32::INFINITY,
            max_texture_size: 1,
            ..LodSettings::default()
        };
        let lod = LodCriterion::from(
            ViewFrustumCriterion::new(settings).with_registry(Arc::new(ResolutionLadder::default())),
        );
        let a = arc(0.0, cube(1000.0));
        let fragments = [fragment(cube(1000.0))];
        assert!(!lod.needs_refinement(
            ArcRef {
                arc: &a,
                fragments: &fragments
            },
            &view
        ));
    }

    /// The finest match across registries wins.
    #[test]
    fn test_finest_registry_match_wins() {
        let view = ProbeView::new(1.0, true);
        let settings = LodSettings {
            max_pixel_error: f32::INFINITY,
            max_texture_size: 50,
            ..LodSettings::default()
        };
        let coarse_only = ViewFrustumCriterion::new(settings)
            .with_registry(Arc::new(ResolutionLadder::new([1.0])));
        let both = coarse_only
            .clone()
            .with_registry(Arc::new(ResolutionLadder::new([0.5])));

        let a = arc(0.0, cube(40.0));
        let fragments = [fragment(cube(40.0))];
        let arc_ref = ArcRef {
            arc: &a,
            fragments: &fragments,
        };
        // 40 / 1.0 = 40 texels fits; 40 / 0.5 = 80 does not.
        assert!(!coarse_only.evaluate(arc_ref, &view).unwrap());
        assert!(both.evaluate(arc_ref, &view).unwrap());
    }

    /// Registry failures surface from the fallible form and read as "no
    /// refinement" from the infallible one.
    #[test]
    fn test_registry_error_is_not_refinement() {
        let view = ProbeView::new(1.0, true);
        let lod = LodCriterion::from(
            criterion(f32::INFINITY).with_registry(Arc::new(BrokenRegistry)),
        );
        let a = arc(0.0, cube(1.0));
        let fragments = [fragment(cube(1.0))];
        let arc_ref = ArcRef {
            arc: &a,
            fragments: &fragments,
        };
        assert!(matches!(
            lod.try_needs_refinement(arc_ref, &view),
            Err(CriterionError::Registry { .. })
        ));
        assert!(!lod.needs_refinement(arc_ref, &view));
    }

    #[test]
    fn test_non_finite_projection_is_error() {
        let view = ProbeView::new(f32::NAN, true);
        let lod = LodCriterion::from(criterion(1.0));
        let a = arc(1.0, cube(1.0));
        let arc_ref = ArcRef {
            arc: &a,
            fragments: &[],
        };
        assert!(matches!(
            lod.try_needs_refinement(arc_ref, &view),
            Err(CriterionError::NonFiniteProjection { .. })
        ));
        assert!(!lod.needs_refinement(arc_ref, &view));
    }

    /// z_scale stretches boxes vertically before the distance is measured.
    #[test]
    fn test_z_scale_applies_to_boxes() {
        struct DistanceView;
        impl ViewState for DistanceView {
            fn eye_position(&self) -> Vec3 {
                Vec3::new(0.0, 0.0, 20.0)
            }
            fn pixel_size_for_distance(&self, distance: f32) -> f32 {
                100.0 / distance.max(1.0)
            }
            fn frustum_intersects(&self, _bbox: &Aabb) -> bool {
                true
            }
        }

        // Unscaled: box top at z = 10, distance 10, 10 px/unit, error 1 => 10 px.
        // Scaled by 2: top at z = 20, distance 0 (clamped to 1) => 100 px.
        let a = arc(1.0, cube(10.0));
        let arc_ref = ArcRef {
            arc: &a,
            fragments: &[],
        };
        let flat = ViewFrustumCriterion::new(LodSettings {
            max_pixel_error: 50.0,
            ..LodSettings::default()
        });
        let tall = ViewFrustumCriterion::new(LodSettings {
            max_pixel_error: 50.0,
            z_scale: 2.0,
            ..LodSettings::default()
        });
        assert!(!flat.evaluate(arc_ref, &DistanceView).unwrap());
        assert!(tall.evaluate(arc_ref, &DistanceView).unwrap());
    }
}
