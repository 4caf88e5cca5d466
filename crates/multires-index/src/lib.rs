//! Binary index of a precomputed multiresolution mesh: the DAG of nodes and
//! refinement arcs plus the headers of the mesh fragments they carry.

mod builder;
mod error;
mod index;
mod record;

pub use builder::{FragmentSpec, IndexBuilder};
pub use error::IndexError;
pub use index::{ArcRef, IncomingArcs, MultiresIndex};
pub use record::{
    ARC_RECORD_SIZE, DagArc, DagNode, FRAGMENT_RECORD_SIZE, FORMAT_VERSION, FragmentHeader,
    HEADER_SIZE, IndexHeader, MAGIC, NO_ID, NODE_RECORD_SIZE,
};
