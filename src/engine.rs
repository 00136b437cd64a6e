// src/engine.rs
//
// The core of imgconv. Converts one decoded pixel buffer into any of the
// supported containers:
// 1. Normalize the color mode when the target demands it
// 2. Square-crop and resize for fixed-size outputs (icons)
// 3. Run the encoder selected by the format's strategy
//
// This file is a facade over the decomposed modules in engine/

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod admission;
mod api;
mod common;
mod decoder;
mod document;
mod encoder;
pub mod geometry;
mod icon;
mod normalize;
mod pool;
mod tasks;

pub use admission::{AdmissionLimits, DEFAULT_MAX_DIMENSION, DEFAULT_MAX_FILE_SIZE};
pub use api::{
    convert, convert_named, ConversionResult, Converter, ConverterConfig, EncodedImage,
    FailedConversion, DEFAULT_JPEG_QUALITY, DEFAULT_PNG_OPTIMIZATION_LEVEL, DEFAULT_WEBP_QUALITY,
};
pub use common::{run_with_panic_policy, EngineResult};
pub use decoder::{decode_pixel_buffer, detect_format};
pub use document::encode_pdf;
pub use encoder::{
    encode_apng, encode_generic, encode_jp2, encode_jpeg, encode_png, encode_webp,
};
pub use geometry::{fallback_icon_size, icon_size, resize_square, SquareCrop};
pub use icon::{
    encode_icon, fallback_mode, try_fallback_icon, try_primary_icon, DibIconWriter, EncodedIcon,
    IconWriter, PngIconWriter,
};
pub use normalize::{composite_over_white, flatten_onto_white, normalize, target_mode};
pub use pool::configured_threads;
pub use tasks::BatchReport;
