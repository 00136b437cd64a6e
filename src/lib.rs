// lib.rs
//
// imgconv: image format conversion engine
//
// Design goals:
// - One decoded buffer, many output containers
// - Every request yields a result; no failure aborts a batch
// - Pure transformations: the source buffer is never mutated
// - Parallel batch conversion on a shared worker pool

pub mod buffer;
pub mod codecs;
pub mod engine;
pub mod error;
pub mod format;

use image::ImageReader;
use std::io::Cursor;

pub use buffer::{ColorMode, IndexedImage, PixelBuffer};
pub use engine::{
    convert, convert_named, decode_pixel_buffer, AdmissionLimits, BatchReport, ConversionResult,
    Converter, ConverterConfig, EncodedImage, FailedConversion, IconWriter,
};
pub use error::{ConvertError, ErrorCategory, Result};
pub use format::{EncoderKind, FormatId, FormatTraits};

/// Header facts shown to the user before they pick output formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
    pub size_bytes: usize,
}

/// Read dimensions and container from the header without decoding pixels.
pub fn inspect_header_from_bytes(data: &[u8]) -> Result<InspectMetadata> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ConvertError::decode_failed(format!("failed to read image header: {e}")))?;

    let format = reader.format().map(|f| format!("{:?}", f).to_uppercase());
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ConvertError::decode_failed(format!("failed to read dimensions: {e}")))?;

    Ok(InspectMetadata {
        width,
        height,
        format,
        size_bytes: data.len(),
    })
}

/// Get library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Output format identifiers, in menu order.
pub fn supported_output_formats() -> Vec<&'static str> {
    FormatId::ALL.iter().map(|f| f.identifier()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    #[test]
    fn inspect_reads_header() {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(7, 3))
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let meta = inspect_header_from_bytes(&png).unwrap();
        assert_eq!((meta.width, meta.height), (7, 3));
        assert_eq!(meta.format.as_deref(), Some("PNG"));
        assert_eq!(meta.size_bytes, png.len());
    }

    #[test]
    fn output_formats_cover_menu() {
        let formats = supported_output_formats();
        assert_eq!(formats.len(), 11);
        assert_eq!(formats[0], "PNG");
        assert!(formats.contains(&"APNG"));
    }
}
