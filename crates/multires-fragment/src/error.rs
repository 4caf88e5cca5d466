//! Fragment loading errors.

/// Errors raised while loading or decoding fragment payloads.
#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    /// The blob reader failed. The fragment stays unloaded.
    #[error("failed to load fragment {id}: {source}")]
    Load {
        id: u32,
        #[source]
        source: std::io::Error,
    },
    /// No fragment with this id exists in the index.
    #[error("unknown fragment {0}")]
    UnknownFragment(u32),
    /// The payload bytes disagree with their declared sizes.
    #[error("malformed fragment payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },
    /// A payload declares an index that points past its vertices.
    #[error("triangle index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: u32 },
    /// A loader worker thread could not be started.
    #[error("failed to spawn fragment loader worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<FragmentError> for std::io::Error {
    fn from(err: FragmentError) -> Self {
        match err {
            FragmentError::Load { source, .. } | FragmentError::Spawn(source) => source,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
