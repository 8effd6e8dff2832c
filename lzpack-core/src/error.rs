//! Error types for lzpack operations.
//!
//! Every result code an encoding session can surface maps to one variant of
//! [`LzError`]. The type is `Clone` so that a failure latched inside a session
//! (a short write, a broken input stream) can be reported again at every later
//! checkpoint without re-running the operation that caused it.

use thiserror::Error;

/// The main error type for lzpack operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LzError {
    /// Allocation of a session buffer failed.
    #[error("Out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested.
        requested: usize,
    },

    /// A configuration value is out of range.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the rejected value.
        message: String,
    },

    /// The output sink reported a short or failed write.
    #[error("Write failed: {reason}")]
    Write {
        /// Message reported by the sink.
        reason: String,
    },

    /// The input source reported a read failure.
    #[error("Read failed: {reason}")]
    Read {
        /// Message reported by the source.
        reason: String,
    },

    /// The destination buffer of a one-shot encode was smaller than the output.
    #[error("Output buffer exhausted after {written} bytes")]
    OutputExhausted {
        /// Bytes actually written before the buffer ran out.
        written: usize,
    },

    /// The caller must retry with a buffer of at least `needed` bytes.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },

    /// The progress callback asked the session to stop.
    #[error("Aborted by progress callback")]
    Aborted,
}

/// Result type alias for lzpack operations.
pub type Result<T> = std::result::Result<T, LzError>;

impl LzError {
    /// Create an out-of-memory error.
    pub fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory { requested }
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a write failure error.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::Write {
            reason: reason.into(),
        }
    }

    /// Create a read failure error.
    pub fn read_failed(reason: impl Into<String>) -> Self {
        Self::Read {
            reason: reason.into(),
        }
    }

    /// Create an output exhausted error.
    pub fn output_exhausted(written: usize) -> Self {
        Self::OutputExhausted { written }
    }

    /// Create a buffer too small error.
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Self::BufferTooSmall { needed, available }
    }

    /// Whether the error came from the input or output stream.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::Read { .. })
    }
}
