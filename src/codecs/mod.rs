// src/codecs/mod.rs
//
// Codec-specific safe abstractions for FFI operations.

#[cfg(feature = "jp2")]
pub mod jp2_safe;
