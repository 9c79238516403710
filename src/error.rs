//! Error types shared across the crate.

use thiserror::Error;

/// Errors returned by document operations.
///
/// Local operations fail without mutating the document. A failed merge
/// may leave the destination with any prefix of the source integrated;
/// the caller is expected to discard it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DocError {
    /// A visible position exceeded the live length of the document.
    ///
    /// `overflow` is how far past the last valid position the request
    /// landed. An overflow of zero means "exactly at end of document",
    /// which insert accepts and every other operation rejects.
    #[error("position out of bounds by {overflow}")]
    OutOfBounds { overflow: usize },

    /// An argument was rejected before any work happened.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A delete asked for more live characters than remain from its
    /// starting position.
    #[error("not enough visible characters to delete")]
    InsufficientItems,

    /// An identity did not resolve to any item in the sequence.
    #[error("no item covers the requested identity")]
    NotFound,

    /// An integrated item's sequence number is not the next expected
    /// one for its client.
    #[error("item sequence number is out of order")]
    InvalidSeq,

    /// No candidate in a merge pass was ready to integrate. The source
    /// document is malformed.
    #[error("merge cannot make progress; source document is malformed")]
    IntegrationDeadlock,
}

pub type Result<T> = std::result::Result<T, DocError>;
