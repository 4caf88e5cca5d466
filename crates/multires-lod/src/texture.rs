//! Texture-resolution lookup for the texturability check.

use crate::error::CriterionError;

/// Answers which available texture resolution (meters per texel) best
/// serves a required ground resolution.
pub trait TextureResolutionRegistry: Send + Sync {
    /// `Ok(None)` when the registry has nothing to offer.
    fn matching_resolution(
        &self,
        required_meters_per_pixel: f32,
    ) -> Result<Option<f32>, CriterionError>;
}

/// Fixed set of available resolutions, e.g. the levels of a texture pyramid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolutionLadder {
    /// Ascending, positive and finite.
    resolutions: Vec<f32>,
}

impl ResolutionLadder {
    /// Non-positive and non-finite values are dropped.
    pub fn new(resolutions: impl IntoIterator<Item = f32>) -> Self {
        let mut resolutions: Vec<f32> = resolutions
            .into_iter()
            .filter(|r| r.is_finite() && *r > 0.0)
            .collect();
        resolutions.sort_by(f32::total_cmp);
        resolutions.dedup();
        Self { resolutions }
    }

    /// Powers of two from `finest` up to `coarsest`.
    pub fn pyramid(finest: f32, levels: u32) -> Self {
        Self::new((0..levels).map(|level| finest * (1u32 << level.min(31)) as f32))
    }

    pub fn resolutions(&self) -> &[f32] {
        &self.resolutions
    }
}

impl TextureResolutionRegistry for ResolutionLadder {
    /// The coarsest resolution at least as fine as the request, or the finest
    /// available when even that is too coarse.
    fn matching_resolution(
        &self,
        required_meters_per_pixel: f32,
    ) -> Result<Option<f32>, CriterionError> {
        let satisfying = self
            .resolutions
            .iter()
            .rev()
            .find(|&&r| r <= required_meters_per_pixel);
        Ok(satisfying.or(self.resolutions.first()).copied())
    }
}
