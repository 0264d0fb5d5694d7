use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors from the staging area and the merge engine.
///
/// Planning errors (`NoChunks` through `ZeroChunkSize`) are produced
/// before the output file is touched and leave the staging area exactly
/// as it was. Execution errors may leave a partial output behind, but
/// never delete a source chunk.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no chunks found for file '{0}'")]
    NoChunks(String),

    #[error("invalid file name: '{0}'")]
    InvalidName(String),

    #[error("malformed chunk name '{0}': no numeric sequence suffix")]
    BadChunkName(String),

    #[error("duplicate sequence index {index} (entry '{entry}')")]
    DuplicateIndex { entry: String, index: u64 },

    #[error("chunk sequence is not contiguous: expected index {expected}, found {found}")]
    IndexGap { expected: u64, found: u64 },

    #[error("chunk '{entry}' is {actual} bytes, expected {expected} for the declared chunk size")]
    ChunkSizeMismatch {
        entry: String,
        expected: u64,
        actual: u64,
    },

    #[error("declared chunk size must be at least 1 byte")]
    ZeroChunkSize,

    #[error("merge layout overflows: {chunks} chunks of {chunk_size} bytes")]
    LayoutOverflow { chunks: u64, chunk_size: u64 },

    #[error("chunk '{entry}' changed during merge: copied {copied} of {planned} planned bytes")]
    ChunkChanged {
        entry: String,
        planned: u64,
        copied: u64,
    },

    #[error("merged output is {actual} bytes, expected {expected}")]
    OutputLength { expected: u64, actual: u64 },

    #[error("merge worker failed: {0}")]
    TaskJoin(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
