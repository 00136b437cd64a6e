// src/engine/icon.rs
//
// Icon (ICO) encoder: a primary pipeline writing a BMP/DIB payload and a
// simplified fallback pipeline writing through the image crate's ICO encoder.
// The two are composed as plain Results: primary, then fallback on error.

use crate::buffer::{ColorMode, PixelBuffer};
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::geometry::{crop_to_square, fallback_icon_size, icon_size, resize_square};
use crate::engine::normalize::{convert_mode, normalize};
use crate::error::ConvertError;
use image::codecs::ico::IcoEncoder;
use image::DynamicImage;
use std::borrow::Cow;

/// Writes one square image into an ICO container.
pub trait IconWriter: Send + Sync {
    fn name(&self) -> &'static str;
    fn write(&self, image: &DynamicImage) -> EngineResult<Vec<u8>>;
}

/// Icon bytes plus the resolution declared in the directory entry.
#[derive(Clone, Debug)]
pub struct EncodedIcon {
    pub bytes: Vec<u8>,
    pub size: u32,
    pub writer: &'static str,
}

const ICONDIR_LEN: usize = 6;
const ICONDIRENTRY_LEN: usize = 16;
const BITMAPINFOHEADER_LEN: usize = 40;

/// Primary writer: uncompressed DIB payload (32-bit BGRA or 24-bit BGR) with
/// an AND mask, the layout every ICO reader understands.
#[derive(Clone, Copy, Debug, Default)]
pub struct DibIconWriter;

impl IconWriter for DibIconWriter {
    fn name(&self) -> &'static str {
        "dib"
    }

    fn write(&self, image: &DynamicImage) -> EngineResult<Vec<u8>> {
        let (width, height) = (image.width(), image.height());
        if width != height || width == 0 || width > 256 {
            return Err(ConvertError::encode_failed(
                "ico",
                format!("icon image must be square and at most 256px, got {width}x{height}"),
            ));
        }
        let (bit_count, channels, pixels): (u16, usize, &[u8]) = match image {
            DynamicImage::ImageRgba8(i) => (32, 4, i.as_raw()),
            DynamicImage::ImageRgb8(i) => (24, 3, i.as_raw()),
            other => {
                return Err(ConvertError::encode_failed(
                    "ico",
                    format!("bmp payload needs RGB or RGBA, got {:?}", other.color()),
                ))
            }
        };
        Ok(write_dib_icon(width, bit_count, channels, pixels))
    }
}

fn write_dib_icon(size: u32, bit_count: u16, channels: usize, pixels: &[u8]) -> Vec<u8> {
    let side = size as usize;
    let xor_stride = (side * bit_count as usize / 8).next_multiple_of(4);
    let and_stride = side.div_ceil(32) * 4;
    let payload_len = BITMAPINFOHEADER_LEN + xor_stride * side + and_stride * side;
    let offset = ICONDIR_LEN + ICONDIRENTRY_LEN;

    let mut out = Vec::with_capacity(offset + payload_len);

    // ICONDIR
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // type: icon
    out.extend_from_slice(&1u16.to_le_bytes()); // one image

    // ICONDIRENTRY; 0 encodes 256
    let dim_byte = if size >= 256 { 0 } else { size as u8 };
    out.push(dim_byte);
    out.push(dim_byte);
    out.push(0); // no palette
    out.push(0);
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&bit_count.to_le_bytes());
    out.extend_from_slice(&(payload_len as u32).to_le_bytes());
    out.extend_from_slice(&(offset as u32).to_le_bytes());

    // BITMAPINFOHEADER; height covers XOR and AND bitmaps
    out.extend_from_slice(&(BITMAPINFOHEADER_LEN as u32).to_le_bytes());
    out.extend_from_slice(&(size as i32).to_le_bytes());
    out.extend_from_slice(&((size * 2) as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&bit_count.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
    out.extend_from_slice(&((payload_len - BITMAPINFOHEADER_LEN) as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 16]); // resolution and palette counts

    // XOR bitmap, bottom-up
    for row in pixels.chunks_exact(side * channels).rev() {
        let start = out.len();
        for px in row.chunks_exact(channels) {
            out.extend_from_slice(&[px[2], px[1], px[0]]);
            if channels == 4 {
                out.push(px[3]);
            }
        }
        out.resize(start + xor_stride, 0);
    }

    // AND mask, bottom-up; a set bit marks a transparent pixel
    for row in pixels.chunks_exact(side * channels).rev() {
        let mut mask = vec![0u8; and_stride];
        if channels == 4 {
            for (x, px) in row.chunks_exact(4).enumerate() {
                if px[3] == 0 {
                    mask[x / 8] |= 0x80 >> (x % 8);
                }
            }
        }
        out.extend_from_slice(&mask);
    }

    out
}

/// Fallback writer: the image crate's ICO encoder (PNG payload).
///
/// ICO readers only accept RGBA PNG payloads, so every input is expanded to
/// RGBA8 before it is written.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngIconWriter;

impl IconWriter for PngIconWriter {
    fn name(&self) -> &'static str {
        "png"
    }

    fn write(&self, image: &DynamicImage) -> EngineResult<Vec<u8>> {
        let rgba: Cow<'_, DynamicImage> = match image {
            DynamicImage::ImageRgba8(_) => Cow::Borrowed(image),
            other => Cow::Owned(DynamicImage::ImageRgba8(other.to_rgba8())),
        };
        let mut buf = Vec::new();
        rgba.write_with_encoder(IcoEncoder::new(&mut buf))
            .map_err(|e| ConvertError::encode_failed("ico", e.to_string()))?;
        Ok(buf)
    }
}

/// Run the primary pipeline and, if it fails, the fallback pipeline.
pub fn encode_icon(
    buffer: &PixelBuffer,
    primary: &dyn IconWriter,
    fallback: &dyn IconWriter,
) -> EngineResult<EncodedIcon> {
    let primary_err = match run_with_panic_policy("encode:ico:primary", || {
        try_primary_icon(buffer, primary)
    }) {
        Ok(icon) => return Ok(icon),
        Err(err) => err,
    };

    tracing::warn!(
        writer = primary.name(),
        error = %primary_err,
        "primary icon path failed, trying fallback"
    );

    run_with_panic_policy("encode:ico:fallback", || try_fallback_icon(buffer, fallback)).map_err(
        |fallback_err| {
            tracing::error!(
                primary = %primary_err,
                fallback = %fallback_err,
                "icon encoding exhausted"
            );
            ConvertError::icon_encoding_exhausted(&primary_err, &fallback_err)
        },
    )
}

/// Threshold size, square crop, RGB/RGBA normalization, Lanczos resize.
pub fn try_primary_icon(buffer: &PixelBuffer, writer: &dyn IconWriter) -> EngineResult<EncodedIcon> {
    let (w, h) = buffer.dimensions();
    let size = icon_size(w.min(h));
    tracing::debug!(width = w, height = h, size, "icon size selected");

    let square = crop_to_square(buffer)?;
    let normalized = normalize(&square, &[ColorMode::Rgb, ColorMode::Rgba])?;
    let image = resized_square(&normalized, size)?;

    let bytes = writer.write(&image)?;
    Ok(EncodedIcon {
        bytes,
        size,
        writer: writer.name(),
    })
}

/// Simplified path: size `min(256, base)`, narrow mode coercion.
pub fn try_fallback_icon(
    buffer: &PixelBuffer,
    writer: &dyn IconWriter,
) -> EngineResult<EncodedIcon> {
    let (w, h) = buffer.dimensions();
    let size = fallback_icon_size(w.min(h));

    let square = crop_to_square(buffer)?;
    let mode = fallback_mode(&square);
    let coerced = if square.color_mode() == mode {
        Cow::Borrowed(&square)
    } else {
        Cow::Owned(convert_mode(&square, mode)?)
    };
    let image = resized_square(&coerced, size)?;

    let bytes = writer.write(&image)?;
    Ok(EncodedIcon {
        bytes,
        size,
        writer: writer.name(),
    })
}

/// RGB and RGBA are kept; alpha-capable or palette sources become RGBA,
/// anything else RGB.
pub fn fallback_mode(buffer: &PixelBuffer) -> ColorMode {
    match buffer.color_mode() {
        mode @ (ColorMode::Rgb | ColorMode::Rgba) => mode,
        ColorMode::GrayscaleAlpha | ColorMode::Palette => ColorMode::Rgba,
        _ if buffer.has_transparency_metadata() || buffer.carries_alpha() => ColorMode::Rgba,
        _ => ColorMode::Rgb,
    }
}

fn resized_square(buffer: &PixelBuffer, size: u32) -> EngineResult<DynamicImage> {
    let image = buffer.to_dynamic();
    if buffer.dimensions() == (size, size) {
        return Ok(image);
    }
    resize_square(&image, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::IndexedImage;
    use image::{GenericImageView, GrayImage, Luma, RgbImage, RgbaImage};

    struct FailingWriter;

    impl IconWriter for FailingWriter {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn write(&self, _image: &DynamicImage) -> EngineResult<Vec<u8>> {
            Err(ConvertError::encode_failed("ico", "unsupported bit depth"))
        }
    }

    fn create_test_image(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_dynamic(DynamicImage::ImageRgb8(RgbImage::from_fn(
            width,
            height,
            |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]),
        )))
        .unwrap()
    }

    fn entry(bytes: &[u8]) -> (u8, u8, u16) {
        (bytes[6], bytes[7], u16::from_le_bytes([bytes[12], bytes[13]]))
    }

    #[test]
    fn primary_writes_bmp_payload() {
        let icon = encode_icon(&create_test_image(500, 500), &DibIconWriter, &PngIconWriter).unwrap();
        assert_eq!(icon.size, 256);
        assert_eq!(icon.writer, "dib");
        assert_eq!(&icon.bytes[0..4], &[0, 0, 1, 0]);
        assert_eq!(entry(&icon.bytes), (0, 0, 24));
        // BITMAPINFOHEADER follows the directory
        assert_eq!(u32::from_le_bytes(icon.bytes[22..26].try_into().unwrap()), 40);
        assert_eq!(i32::from_le_bytes(icon.bytes[30..34].try_into().unwrap()), 512);
    }

    #[test]
    fn primary_size_for_rectangular_input() {
        let icon = encode_icon(&create_test_image(100, 150), &DibIconWriter, &PngIconWriter).unwrap();
        assert_eq!(icon.size, 64);
        assert_eq!(entry(&icon.bytes).0, 64);
    }

    #[test]
    fn tiny_input_is_upscaled_to_16() {
        let icon = encode_icon(&create_test_image(10, 10), &DibIconWriter, &PngIconWriter).unwrap();
        assert_eq!(icon.size, 16);
    }

    #[test]
    fn grayscale_becomes_32bit() {
        let gray = PixelBuffer::from_dynamic(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            40,
            40,
            Luma([50]),
        )))
        .unwrap();
        let icon = encode_icon(&gray, &DibIconWriter, &PngIconWriter).unwrap();
        assert_eq!(icon.size, 32);
        assert_eq!(entry(&icon.bytes).2, 32);
    }

    #[test]
    fn and_mask_marks_transparent_pixels() {
        let img = RgbaImage::from_fn(16, 16, |x, _| {
            if x == 0 {
                image::Rgba([0, 0, 0, 0])
            } else {
                image::Rgba([1, 2, 3, 255])
            }
        });
        let bytes = DibIconWriter
            .write(&DynamicImage::ImageRgba8(img))
            .unwrap();
        let xor_len = 16 * 16 * 4;
        let mask_start = 22 + 40 + xor_len;
        // first bit of every mask row is set, 4-byte rows
        assert_eq!(bytes[mask_start], 0x80);
        assert_eq!(bytes[mask_start + 1], 0x00);
        assert_eq!(bytes.len(), mask_start + 16 * 4);
        // first XOR pixel of the bottom row is BGRA of (0,15)
        assert_eq!(&bytes[62..66], &[0, 0, 0, 0]);
        assert_eq!(&bytes[66..70], &[3, 2, 1, 255]);
    }

    #[test]
    fn fallback_engages_with_min_base_size() {
        let icon = encode_icon(&create_test_image(100, 150), &FailingWriter, &PngIconWriter).unwrap();
        assert_eq!(icon.size, 100);
        assert_eq!(icon.writer, "png");
        let decoded = image::load_from_memory_with_format(&icon.bytes, image::ImageFormat::Ico)
            .unwrap();
        assert_eq!(decoded.dimensions(), (100, 100));
    }

    fn decode_fallback(src: &PixelBuffer) -> image::RgbaImage {
        let icon = try_fallback_icon(src, &PngIconWriter).unwrap();
        let decoded = image::load_from_memory_with_format(&icon.bytes, image::ImageFormat::Ico)
            .unwrap();
        assert_eq!(decoded.dimensions(), (icon.size, icon.size));
        decoded.to_rgba8()
    }

    #[test]
    fn fallback_output_decodes_for_every_mode() {
        // Rgb branch
        let rgb = decode_fallback(&create_test_image(40, 60));
        assert_eq!(rgb.dimensions(), (40, 40));
        assert_eq!(rgb.get_pixel(3, 0).0, [3, 10, 128, 255]);

        // Grayscale coerced to Rgb
        let gray = PixelBuffer::from_dynamic(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            40,
            40,
            Luma([77]),
        )))
        .unwrap();
        assert_eq!(decode_fallback(&gray).get_pixel(10, 10).0, [77, 77, 77, 255]);

        // Rgba kept as is
        let rgba = PixelBuffer::from_dynamic(DynamicImage::ImageRgba8(RgbaImage::from_fn(
            20,
            20,
            |x, _| image::Rgba([9, 8, 7, if x < 10 { 0 } else { 255 }]),
        )))
        .unwrap();
        let out = decode_fallback(&rgba);
        assert_eq!(out.get_pixel(2, 5).0[3], 0);
        assert_eq!(out.get_pixel(17, 5).0, [9, 8, 7, 255]);

        // Palette with a transparent index becomes Rgba
        let indexed = IndexedImage::new(
            20,
            20,
            (0..400).map(|i| if i % 20 < 10 { 0 } else { 1 }).collect(),
            vec![[0, 0, 0], [200, 10, 10]],
            Some(0),
        )
        .unwrap();
        let out = decode_fallback(&PixelBuffer::from_indexed(indexed));
        assert_eq!(out.get_pixel(2, 5).0[3], 0);
        assert_eq!(out.get_pixel(17, 5).0, [200, 10, 10, 255]);

        // 16-bit with alpha becomes Rgba; tiny sources are upscaled to 16
        let wide = PixelBuffer::from_dynamic(DynamicImage::ImageRgba16(
            image::ImageBuffer::from_pixel(8, 8, image::Rgba([65535u16, 0, 0, 65535])),
        ))
        .unwrap();
        let out = decode_fallback(&wide);
        assert_eq!(out.dimensions(), (16, 16));
        let [r, g, _, a] = out.get_pixel(8, 8).0;
        assert!(r > 250 && g < 5 && a > 250, "{:?}", (r, g, a));
    }

    #[test]
    fn total_failure_is_reported() {
        let err = encode_icon(&create_test_image(64, 64), &FailingWriter, &FailingWriter).unwrap_err();
        assert_eq!(err.to_string(), "icon encoding failed");
        assert!(matches!(err, ConvertError::IconEncodingExhausted { .. }));
    }

    #[test]
    fn fallback_mode_rules() {
        let gray = PixelBuffer::from_dynamic(DynamicImage::ImageLuma8(GrayImage::new(2, 2))).unwrap();
        assert_eq!(fallback_mode(&gray), ColorMode::Rgb);
        let indexed = IndexedImage::new(1, 1, vec![0], vec![[0, 0, 0]], None).unwrap();
        assert_eq!(
            fallback_mode(&PixelBuffer::from_indexed(indexed)),
            ColorMode::Rgba
        );
        let wide_alpha = PixelBuffer::from_dynamic(DynamicImage::ImageRgba16(
            image::ImageBuffer::new(1, 1),
        ))
        .unwrap();
        assert_eq!(fallback_mode(&wide_alpha), ColorMode::Rgba);
        assert_eq!(fallback_mode(&create_test_image(2, 2)), ColorMode::Rgb);
    }

    #[test]
    fn source_buffer_is_untouched() {
        let src = create_test_image(400, 300);
        let icon = encode_icon(&src, &DibIconWriter, &PngIconWriter).unwrap();
        assert_eq!(icon.size, 256);
        assert_eq!(src.dimensions(), (400, 300));
    }
}
