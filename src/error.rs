//! Error types and result taxonomy for the codec.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Needing more blocks is a normal protocol state, not an error:
//!   it is reported through [`FeedStatus`], never through [`CodecError`]
//! - Malformed input is rejected before any state is mutated

use thiserror::Error;

/// Outcome of feeding a block into a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// The message is fully solved; output can be reconstructed.
    Complete,
    /// More encoded blocks are required before the solve can finish.
    NeedMoreBlocks,
}

impl FeedStatus {
    /// True when the decode finished.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => f.write_str("complete"),
            Self::NeedMoreBlocks => f.write_str("need more blocks"),
        }
    }
}

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The derived block count is not in the supported parameter table.
    #[error("unsupported block count {block_count}")]
    UnsupportedBlockCount {
        /// Block count derived from (message_bytes, block_bytes).
        block_count: usize,
    },

    /// Message or block sizing is degenerate (zero length).
    #[error("invalid sizes: message_bytes={message_bytes}, block_bytes={block_bytes}")]
    InvalidSizes {
        /// Message length in bytes.
        message_bytes: usize,
        /// Block length in bytes.
        block_bytes: usize,
    },

    /// A caller buffer does not match the configured length.
    #[error("buffer length mismatch: expected {expected}, got {got}")]
    BufferLengthMismatch {
        /// Required buffer length in bytes.
        expected: usize,
        /// Length of the buffer that was passed.
        got: usize,
    },

    /// A column accumulated more row references than the static bound.
    ///
    /// Cannot occur for table-supported block counts on the encoder path;
    /// a decoder hitting this has been fed a malformed stream.
    #[error("row reference list overflow on column {column}")]
    RowReferencesExceeded {
        /// Column whose reference list overflowed.
        column: u16,
    },

    /// The encoder-side system was singular at the given pivot.
    ///
    /// The parameter table seeds are tuned so this cannot happen when the
    /// encoder is fed its own source blocks.
    #[error("singular system at pivot {pivot}")]
    SingularSystem {
        /// First pivot for which no row was available.
        pivot: u16,
    },

    /// The operation requires a completed solve.
    #[error("codec has not solved the system yet")]
    NotReady,

    /// Workspace or matrix storage could not be allocated.
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory {
        /// Size of the failed allocation.
        bytes: usize,
    },
}
