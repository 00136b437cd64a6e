// src/format.rs
//
// The closed set of output format identifiers.
// Dispatch over this enum is exhaustive: there is no runtime registry to miss.

use crate::buffer::ColorMode;
use crate::error::ConvertError;
use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Container capabilities that drive encoder selection.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FormatTraits: u8 {
        /// Container can carry an alpha channel
        const ALPHA = 1 << 0;
        /// Default settings are lossy
        const LOSSY = 1 << 1;
        /// Output is a fixed square resolution (icons)
        const FIXED_SQUARE = 1 << 2;
        /// Output is a document wrapping the image, not an image container
        const DOCUMENT = 1 << 3;
        /// Container is an animation container holding a single frame
        const ANIMATION_CONTAINER = 1 << 4;
    }
}

/// Which encoding strategy a format is dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderKind {
    Generic,
    AlphaFlattening,
    Icon,
    Document,
}

/// Output format identifier.
///
/// `Tif` and `Tiff` both produce a TIFF container and only differ in the
/// file extension handed to the delivery side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatId {
    Png,
    Jpeg,
    Webp,
    Bmp,
    Tif,
    Tiff,
    Gif,
    Ico,
    Pdf,
    Jp2,
    Apng,
}

impl FormatId {
    /// Every identifier, in menu order.
    pub const ALL: [FormatId; 11] = [
        FormatId::Png,
        FormatId::Jpeg,
        FormatId::Webp,
        FormatId::Bmp,
        FormatId::Tif,
        FormatId::Tiff,
        FormatId::Gif,
        FormatId::Ico,
        FormatId::Pdf,
        FormatId::Jp2,
        FormatId::Apng,
    ];

    /// Parse a user-facing identifier (case-insensitive).
    pub fn parse(identifier: &str) -> Result<Self, ConvertError> {
        match identifier.trim().to_ascii_uppercase().as_str() {
            "PNG" => Ok(Self::Png),
            "JPEG" => Ok(Self::Jpeg),
            "WEBP" => Ok(Self::Webp),
            "BMP" => Ok(Self::Bmp),
            "TIF" => Ok(Self::Tif),
            "TIFF" => Ok(Self::Tiff),
            "GIF" => Ok(Self::Gif),
            "ICO" => Ok(Self::Ico),
            "PDF" => Ok(Self::Pdf),
            "JP2" => Ok(Self::Jp2),
            "APNG" => Ok(Self::Apng),
            _ => Err(ConvertError::unsupported_format(identifier.to_string())),
        }
    }

    /// The identifier as the user selects it.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Webp => "WEBP",
            Self::Bmp => "BMP",
            Self::Tif => "TIF",
            Self::Tiff => "TIFF",
            Self::Gif => "GIF",
            Self::Ico => "ICO",
            Self::Pdf => "PDF",
            Self::Jp2 => "JP2",
            Self::Apng => "APNG",
        }
    }

    /// Container written for this identifier.
    pub fn container(&self) -> &'static str {
        match self {
            Self::Png | Self::Apng => "PNG",
            Self::Jpeg => "JPEG",
            Self::Webp => "WEBP",
            Self::Bmp => "BMP",
            Self::Tif | Self::Tiff => "TIFF",
            Self::Gif => "GIF",
            Self::Ico => "ICO",
            Self::Pdf => "PDF",
            Self::Jp2 => "JPEG2000",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tif => "tif",
            Self::Tiff => "tiff",
            Self::Gif => "gif",
            Self::Ico => "ico",
            Self::Pdf => "pdf",
            Self::Jp2 => "jp2",
            Self::Apng => "apng",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Apng => "image/apng",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Tif | Self::Tiff => "image/tiff",
            Self::Gif => "image/gif",
            Self::Ico => "image/vnd.microsoft.icon",
            Self::Pdf => "application/pdf",
            Self::Jp2 => "image/jp2",
        }
    }

    pub fn traits(&self) -> FormatTraits {
        match self {
            Self::Png | Self::Bmp | Self::Tif | Self::Tiff | Self::Gif | Self::Jp2 => {
                FormatTraits::ALPHA
            }
            Self::Apng => FormatTraits::ALPHA | FormatTraits::ANIMATION_CONTAINER,
            Self::Webp => FormatTraits::ALPHA | FormatTraits::LOSSY,
            Self::Jpeg => FormatTraits::LOSSY,
            Self::Ico => FormatTraits::ALPHA | FormatTraits::FIXED_SQUARE,
            Self::Pdf => FormatTraits::DOCUMENT,
        }
    }

    pub fn encoder_kind(&self) -> EncoderKind {
        match self {
            Self::Jpeg => EncoderKind::AlphaFlattening,
            Self::Ico => EncoderKind::Icon,
            Self::Pdf => EncoderKind::Document,
            Self::Png
            | Self::Webp
            | Self::Bmp
            | Self::Tif
            | Self::Tiff
            | Self::Gif
            | Self::Jp2
            | Self::Apng => EncoderKind::Generic,
        }
    }

    /// Color modes the codec for this format takes without conversion.
    pub fn accepted_modes(&self) -> &'static [ColorMode] {
        use ColorMode::*;
        match self {
            Self::Png | Self::Apng | Self::Bmp | Self::Jp2 => {
                &[Rgb, Rgba, Grayscale, GrayscaleAlpha]
            }
            Self::Tif | Self::Tiff => &[Rgb, Rgba, Grayscale],
            Self::Webp | Self::Gif | Self::Ico => &[Rgb, Rgba],
            Self::Jpeg | Self::Pdf => &[Rgb],
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for FormatId {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
