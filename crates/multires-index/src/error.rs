//! Errors raised while decoding or validating a multiresolution index.

/// The index is truncated, corrupt or inconsistent. Opening an index aborts
/// on the first such error.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The data does not start with the expected magic bytes.
    #[error("invalid magic bytes")]
    InvalidMagic,
    /// The format version is not supported by this build.
    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),
    /// A record or table extends past the end of the buffer.
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum byte count needed.
        expected: usize,
        /// Actual byte count available.
        actual: usize,
    },
    /// A node's outgoing arc range is out of bounds or contains foreign arcs.
    #[error("node {node} has an invalid outgoing arc range {lowest}..={highest}")]
    NodeArcRange { node: u32, lowest: i32, highest: i32 },
    /// A node's incoming arc chain is broken or does not end at the node.
    #[error("node {node} has an invalid incoming arc chain at arc {arc}")]
    IncomingChain { node: u32, arc: i32 },
    /// An arc refers to a node that does not exist.
    #[error("arc {arc} refers to missing node {node}")]
    ArcEndpoint { arc: u32, node: i32 },
    /// An arc's fragment range is out of bounds.
    #[error("arc {arc} has an invalid fragment range {lowest}..={highest}")]
    ArcFragmentRange { arc: u32, lowest: i32, highest: i32 },
    /// A fragment has a negative blob position or length.
    #[error("fragment {fragment} has an invalid blob range")]
    FragmentBlobRange { fragment: u32 },
    /// The arcs form a cycle.
    #[error("refinement graph contains a cycle")]
    Cycle,
    /// Reading or writing the index file failed.
    #[error("index i/o failed: {0}")]
    Io(#[from] std::io::Error),
}
