//! Mesh fragment payloads: blob readers, the lazily loading fragment store,
//! a background loader pool and memory budgeting.

mod blob;
mod budget;
mod error;
mod loader;
mod payload;
mod store;

pub use blob::{FileBlobReader, FragmentBlobReader, MemoryBlobReader};
pub use budget::{EvictionCandidate, MemoryBudget, select_evictions};
pub use error::FragmentError;
pub use loader::{FragmentLoader, LoadOutcome};
pub use payload::{FragmentPayload, IndexWidth, PAYLOAD_HEADER_SIZE};
pub use store::FragmentStore;
