//! Error taxonomy for the decode-and-lay-out pipeline.
//!
//! Fatal variants abort the pipeline for one archive only; the batch driver
//! logs them and moves on. Recoverable variants never escape the unpacker or
//! the tree builder: they are logged and the member degrades to a placeholder
//! or an opaque copy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The leading directory record (or a later segment) cannot be parsed.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// Neither the primary nor the fallback INMR02 names a dataset.
    #[error("container has no dataset name")]
    NoDataset,

    /// Member decomposition was requested for a sequential dataset.
    #[error("dataset {0} is not partitioned")]
    NotPartitioned(String),

    /// A structural precondition of the transmission format is violated.
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("nested container {member} could not be decoded: {reason}")]
    NestedDecodeFailure { member: String, reason: String },

    #[error("archive member {member} could not be extracted: {reason}")]
    ArchiveExtractionFailure { member: String, reason: String },

    #[error("nesting depth {depth} exceeds limit of {limit}")]
    ExcessiveNesting { depth: usize, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Recoverable conditions degrade a single member instead of an archive.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NestedDecodeFailure { .. }
                | Error::ArchiveExtractionFailure { .. }
                | Error::ExcessiveNesting { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
