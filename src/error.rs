//! Error types for the stub runtime.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the stub's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running as a packed stub.
///
/// Every variant except [`Error::UpdateCheckFailed`] is fatal: the
/// orchestrator prints a one-line diagnostic and exits with code 1. The
/// update-check path recovers from its own errors locally and never
/// surfaces this variant past `update::checker` (spec §7).
#[derive(Error, Debug)]
pub enum Error {
    /// Every attempted method of finding this executable's own image failed.
    #[error("failed to locate own executable image (tried: {attempted})")]
    SelfOpenFailed {
        /// Comma-separated list of methods attempted.
        attempted: String,
    },

    /// The 32-byte magic marker was not found in the image.
    #[error("payload marker not found in executable image")]
    MarkerNotFound,

    /// Metadata failed validation.
    #[error("invalid stub metadata: {0}")]
    MetadataInvalid(String),

    /// A read ended before the expected number of bytes arrived.
    #[error("short read from executable image")]
    ReadShort,

    /// The decompressor backend failed.
    #[error("[STUB {backend}] decompress failed: {detail}")]
    DecompressFailed {
        /// Backend name, upper-cased for the stderr prefix (e.g. "LZFSE").
        backend: String,
        /// Backend-reported detail.
        detail: String,
    },

    /// A cache directory or file operation failed.
    #[error("cache i/o failed for {}: {detail}", path.display())]
    CacheIoFailed {
        /// Path the operation was attempted against.
        path: PathBuf,
        /// Underlying detail.
        detail: String,
    },

    /// The hand-off to the cached binary failed.
    #[error("failed to launch {}: {detail}", path.display())]
    ExecFailed {
        /// Path to the binary the stub tried to launch.
        path: PathBuf,
        /// `errno`/`GetLastError` detail.
        detail: String,
    },

    /// The update check failed. Recovered locally; never propagated out
    /// of `update::checker` as a fatal error.
    #[error("update check failed: {0}")]
    UpdateCheckFailed(String),
}

impl From<stub_format::Error> for Error {
    fn from(e: stub_format::Error) -> Self {
        match e {
            stub_format::Error::MarkerNotFound => Error::MarkerNotFound,
            stub_format::Error::ReadShort { .. } => Error::ReadShort,
            stub_format::Error::MetadataInvalid(reason) => Error::MetadataInvalid(reason),
            stub_format::Error::OffsetOverflow => {
                Error::MetadataInvalid("offset overflow while scanning for marker".into())
            }
            stub_format::Error::DecompressFailed { backend, detail } => Error::DecompressFailed {
                backend: backend.to_string(),
                detail,
            },
            stub_format::Error::CacheIoFailed { path, detail } => {
                Error::CacheIoFailed { path, detail }
            }
            stub_format::Error::Io(io) => Error::CacheIoFailed {
                path: PathBuf::new(),
                detail: io.to_string(),
            },
        }
    }
}
