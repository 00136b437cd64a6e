// src/error.rs
//
// Unified error handling for imgconv
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid request, recoverable by the caller
// - CodecError: Decode/resize/encode issues
// - ResourceLimit: File size and dimension limits
// - InternalBug: Library bugs (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy shared by every conversion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid request, recoverable by the caller
    UserError,
    /// Decode/resize/encode issues
    CodecError,
    /// File size and dimension limits
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }
}

/// imgconv error types
///
/// Every failure inside the engine ends up as one of these and is carried
/// inside a `Failed` conversion result; none of them aborts a batch.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    // Request Errors
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    // Validation Errors
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("File size {size} bytes exceeds maximum {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid pixel data: {message}")]
    InvalidPixelData { message: Cow<'static, str> },

    // Decode Errors
    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    // Transform Errors
    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("icon encoding failed")]
    IconEncodingExhausted {
        primary: Cow<'static, str>,
        fallback: Cow<'static, str>,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

// Constructor Helpers
impl ConvertError {
    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn invalid_dimensions(width: u32, height: u32) -> Self {
        Self::InvalidDimensions { width, height }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn file_too_large(size: u64, max: u64) -> Self {
        Self::FileTooLarge { size, max }
    }

    pub fn invalid_pixel_data(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidPixelData {
            message: message.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn icon_encoding_exhausted(primary: &ConvertError, fallback: &ConvertError) -> Self {
        Self::IconEncodingExhausted {
            primary: primary.to_string().into(),
            fallback: fallback.to_string().into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (caller can fix it)
    ///
    /// Consistent with category(): UserError and ResourceLimit are recoverable,
    /// CodecError and InternalBug are not.
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Admission failures raised before any encoder runs.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions { .. }
                | Self::DimensionExceedsLimit { .. }
                | Self::FileTooLarge { .. }
                | Self::InvalidPixelData { .. }
        )
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedFormat { .. }
            | Self::InvalidDimensions { .. }
            | Self::InvalidPixelData { .. } => ErrorCategory::UserError,

            // ResizeFailed is a processing failure inside an encoder path, so it is
            // reported together with the codec failures it causes.
            Self::DecodeFailed { .. }
            | Self::ResizeFailed { .. }
            | Self::EncodeFailed { .. }
            | Self::IconEncodingExhausted { .. } => ErrorCategory::CodecError,

            Self::DimensionExceedsLimit { .. } | Self::FileTooLarge { .. } => {
                ErrorCategory::ResourceLimit
            }

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ConvertError>;
