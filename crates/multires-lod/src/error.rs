//! Criterion evaluation errors.

/// A view-state or texture-registry callback failed while evaluating an arc.
#[derive(Debug, thiserror::Error)]
pub enum CriterionError {
    /// A texture-resolution registry could not answer.
    #[error("texture registry failed for {meters_per_pixel} m/px: {message}")]
    Registry {
        meters_per_pixel: f32,
        message: String,
    },
    /// The view state produced a NaN or infinite pixel size.
    #[error("non-finite projection factor {factor} at distance {distance}")]
    NonFiniteProjection { distance: f32, factor: f32 },
}
