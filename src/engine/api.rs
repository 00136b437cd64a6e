// src/engine/api.rs
//
// Conversion Orchestrator: the public entry point of the engine.
// Looks up the strategy for a format, runs it, and reports a structured
// result. Nothing raised inside a strategy escapes `convert`.

use crate::buffer::PixelBuffer;
use crate::engine::admission::{env_override, AdmissionLimits};
use crate::engine::common::EngineResult;
use crate::engine::document::encode_pdf;
use crate::engine::encoder::{encode_generic, encode_jpeg};
use crate::engine::icon::{encode_icon, DibIconWriter, IconWriter, PngIconWriter};
use crate::engine::normalize::flatten_onto_white;
use crate::error::ConvertError;
use crate::format::{EncoderKind, FormatId};
use std::fmt;
use std::sync::{Arc, OnceLock};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const DEFAULT_WEBP_QUALITY: u8 = 80;
pub const DEFAULT_PNG_OPTIMIZATION_LEVEL: u8 = 2;

/// Encoder settings and admission limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConverterConfig {
    pub jpeg_quality: u8,
    pub webp_quality: u8,
    /// oxipng preset, 0..=6
    pub png_optimization_level: u8,
    pub limits: AdmissionLimits,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            webp_quality: DEFAULT_WEBP_QUALITY,
            png_optimization_level: DEFAULT_PNG_OPTIMIZATION_LEVEL,
            limits: AdmissionLimits::default(),
        }
    }
}

impl ConverterConfig {
    /// Defaults overlaid with `IMGCONV_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(q) = env_override::<u8>("IMGCONV_JPEG_QUALITY") {
            config.jpeg_quality = q.clamp(1, 100);
        }
        if let Some(q) = env_override::<u8>("IMGCONV_WEBP_QUALITY") {
            config.webp_quality = q.min(100);
        }
        config.limits = config.limits.with_env_overrides();
        config
    }
}

/// A successfully encoded output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    pub format: FormatId,
    pub bytes: Vec<u8>,
    /// Dimensions of the encoded image (the icon resolution for ICO).
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// File name for delivery, e.g. `converted.jpg`.
    pub fn file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.extension())
    }
}

/// A failed output, keyed by the identifier the caller asked for.
#[derive(Clone, Debug)]
pub struct FailedConversion {
    pub format: String,
    pub error: ConvertError,
}

/// Outcome of one conversion request. There are no partial results.
#[derive(Clone, Debug)]
pub enum ConversionResult {
    Encoded(EncodedImage),
    Failed(FailedConversion),
}

impl ConversionResult {
    pub fn is_encoded(&self) -> bool {
        matches!(self, Self::Encoded(_))
    }

    /// Human-readable failure reason, if any.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Encoded(_) => None,
            Self::Failed(failed) => Some(failed.error.to_string()),
        }
    }

    pub fn format_label(&self) -> &str {
        match self {
            Self::Encoded(encoded) => encoded.format.identifier(),
            Self::Failed(failed) => &failed.format,
        }
    }

    pub fn into_result(self) -> Result<EncodedImage, ConvertError> {
        match self {
            Self::Encoded(encoded) => Ok(encoded),
            Self::Failed(failed) => Err(failed.error),
        }
    }
}

impl fmt::Display for ConversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoded(encoded) => write!(
                f,
                "{}: {} bytes ({}x{})",
                encoded.format,
                encoded.bytes.len(),
                encoded.width,
                encoded.height
            ),
            Self::Failed(failed) => write!(f, "{}: {}", failed.format, failed.error),
        }
    }
}

/// Stateless converter; cheap to clone and safe to share between threads.
#[derive(Clone)]
pub struct Converter {
    config: ConverterConfig,
    primary_icon: Arc<dyn IconWriter>,
    fallback_icon: Arc<dyn IconWriter>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(ConverterConfig::default())
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("primary_icon", &self.primary_icon.name())
            .field("fallback_icon", &self.fallback_icon.name())
            .finish()
    }
}

impl Converter {
    pub fn new(config: ConverterConfig) -> Self {
        Self {
            config,
            primary_icon: Arc::new(DibIconWriter),
            fallback_icon: Arc::new(PngIconWriter),
        }
    }

    pub fn from_env() -> Self {
        Self::new(ConverterConfig::from_env())
    }

    /// Replace the icon writers used by the primary and fallback paths.
    pub fn with_icon_writers(
        mut self,
        primary: Arc<dyn IconWriter>,
        fallback: Arc<dyn IconWriter>,
    ) -> Self {
        self.primary_icon = primary;
        self.fallback_icon = fallback;
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Convert `buffer` into `format`.
    pub fn convert(&self, buffer: &PixelBuffer, format: FormatId) -> ConversionResult {
        match self.encode(buffer, format) {
            Ok(encoded) => {
                tracing::info!(
                    format = %format,
                    bytes = encoded.bytes.len(),
                    width = encoded.width,
                    height = encoded.height,
                    "conversion succeeded"
                );
                ConversionResult::Encoded(encoded)
            }
            Err(error) => self.failed(format.identifier().to_string(), error),
        }
    }

    /// Convert using a user-facing identifier such as `"png"` or `"JP2"`.
    pub fn convert_named(&self, buffer: &PixelBuffer, identifier: &str) -> ConversionResult {
        match FormatId::parse(identifier) {
            Ok(format) => self.convert(buffer, format),
            Err(error) => self.failed(identifier.trim().to_string(), error),
        }
    }

    fn failed(&self, format: String, error: ConvertError) -> ConversionResult {
        tracing::error!(
            format = %format,
            category = error.category().as_str(),
            error = %error,
            "conversion failed"
        );
        ConversionResult::Failed(FailedConversion { format, error })
    }

    fn encode(&self, buffer: &PixelBuffer, format: FormatId) -> EngineResult<EncodedImage> {
        let (width, height) = buffer.dimensions();
        let encoded = |bytes| EncodedImage {
            format,
            bytes,
            width,
            height,
        };

        match format.encoder_kind() {
            EncoderKind::Generic => encode_generic(buffer, format, &self.config).map(encoded),
            EncoderKind::AlphaFlattening => {
                let rgb = flatten_onto_white(buffer);
                encode_jpeg(&rgb, self.config.jpeg_quality).map(encoded)
            }
            EncoderKind::Document => encode_pdf(buffer).map(encoded),
            EncoderKind::Icon => {
                let icon = encode_icon(
                    buffer,
                    self.primary_icon.as_ref(),
                    self.fallback_icon.as_ref(),
                )?;
                Ok(EncodedImage {
                    format,
                    bytes: icon.bytes,
                    width: icon.size,
                    height: icon.size,
                })
            }
        }
    }
}

fn default_converter() -> &'static Converter {
    static DEFAULT: OnceLock<Converter> = OnceLock::new();
    DEFAULT.get_or_init(Converter::default)
}

/// Convert with the default configuration.
pub fn convert(buffer: &PixelBuffer, format: FormatId) -> ConversionResult {
    default_converter().convert(buffer, format)
}

/// Convert with the default configuration using a user-facing identifier.
pub fn convert_named(buffer: &PixelBuffer, identifier: &str) -> ConversionResult {
    default_converter().convert_named(buffer, identifier)
}
