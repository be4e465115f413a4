//! On-disk layout, cache manager, and decompression adapter shared by the
//! stub runtime.
//!
//! This crate has no notion of "being a running stub process" (no argv
//! handling, no exec) — that belongs to the `socket-stub` binary crate.
//! It only knows how to read/validate a packed image's metadata, run the
//! platform decompressor, and manage the on-disk cache.

pub mod cache;
pub mod decompress;
pub mod error;
pub mod format;

pub use error::{Error, Result};
