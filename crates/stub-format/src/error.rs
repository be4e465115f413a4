//! Error types for stub-format.

use thiserror::Error;

/// Result type alias using stub-format's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading, validating, or caching a packed
/// stub image.
#[derive(Error, Debug)]
pub enum Error {
    /// The 32-byte magic marker was not found in the scanned range.
    #[error("marker not found")]
    MarkerNotFound,

    /// A read ended before the expected number of bytes arrived.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ReadShort {
        /// Bytes the caller expected to read.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// The fixed metadata header or optional update-config block failed
    /// validation.
    #[error("invalid metadata: {0}")]
    MetadataInvalid(String),

    /// An offset computation would have overflowed the platform's signed
    /// seek range.
    #[error("offset overflow while scanning for marker")]
    OffsetOverflow,

    /// The configured decompression backend failed.
    #[error("decompress failed ({backend}): {detail}")]
    DecompressFailed {
        /// Backend name, e.g. "lzfse" or "lzms".
        backend: &'static str,
        /// Backend-reported detail.
        detail: String,
    },

    /// A cache directory or file operation failed.
    #[error("cache i/o failed for {}: {detail}", path.display())]
    CacheIoFailed {
        /// Path the operation was attempted against.
        path: std::path::PathBuf,
        /// Underlying detail.
        detail: String,
    },

    /// Propagated I/O error with no more specific variant.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
