//! View-dependent level-of-detail extraction: refinement criteria, DAG-cut
//! extraction, and a per-frame streaming driver over the fragment store.

mod criterion;
mod error;
mod extractor;
mod streaming;
mod texture;
mod view;

pub use criterion::{LodCriterion, LodSettings, ViewFrustumCriterion};
pub use error::CriterionError;
pub use extractor::{AllResident, Cut, CutStats, Extractor, FragmentResidency};
pub use streaming::{Frame, StreamingExtractor};
pub use texture::{ResolutionLadder, TextureResolutionRegistry};
pub use view::{ViewParams, ViewState};
