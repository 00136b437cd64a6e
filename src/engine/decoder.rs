// src/engine/decoder.rs
//
// Decode collaborator adapter: source bytes -> PixelBuffer.
// Limits are enforced from the header before any pixels are allocated.
// JPEG goes through mozjpeg, still WebP through libwebp, palette PNG through
// the png crate (so the palette survives), everything else through `image`.

use crate::buffer::{IndexedImage, PixelBuffer};
use crate::engine::admission::AdmissionLimits;
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::error::ConvertError;
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, RgbImage};
use mozjpeg::{ColorSpace, Decompress};
use std::io::Cursor;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Read the header and check dimensions before decoding.
pub fn ensure_dimensions_safe(bytes: &[u8], limits: &AdmissionLimits) -> EngineResult<()> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ConvertError::decode_failed(format!("failed to read header: {e}")))?;
    if reader.format().is_none() {
        return Err(ConvertError::decode_failed("unrecognized image format"));
    }
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ConvertError::decode_failed(format!("failed to read dimensions: {e}")))?;
    limits.enforce_dimensions(width, height)
}

/// Admit and decode `bytes` into a pixel buffer tagged with its source format.
pub fn decode_pixel_buffer(bytes: &[u8], limits: &AdmissionLimits) -> EngineResult<PixelBuffer> {
    limits.enforce_source_len(bytes.len())?;
    ensure_dimensions_safe(bytes, limits)?;

    let detected = detect_format(bytes);
    let buffer = match detected {
        Some(ImageFormat::Png) => match decode_indexed_png(bytes)? {
            Some(indexed) => PixelBuffer::from_indexed(indexed),
            None => PixelBuffer::from_dynamic(decode_with_image_crate(bytes)?)?,
        },
        Some(ImageFormat::Jpeg) => PixelBuffer::from_dynamic(decode_jpeg_mozjpeg(bytes)?)?,
        Some(ImageFormat::WebP) => PixelBuffer::from_dynamic(decode_webp_libwebp(bytes)?)?,
        _ => PixelBuffer::from_dynamic(decode_with_image_crate(bytes)?)?,
    };
    // Decoders may disagree with the header; check what was actually produced.
    limits.enforce_dimensions(buffer.width(), buffer.height())?;

    tracing::debug!(
        format = ?detected,
        width = buffer.width(),
        height = buffer.height(),
        mode = ?buffer.color_mode(),
        "decoded source image"
    );
    Ok(match detected {
        Some(format) => buffer.with_format_hint(format),
        None => buffer,
    })
}

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo).
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(ConvertError::decode_failed("mozjpeg: missing JPEG EOI marker"));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            ConvertError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;
        // Grayscale sources stay single-channel so the mode normalizer sees them as such.
        let grayscale = matches!(decompress.color_space(), ColorSpace::JCS_GRAYSCALE);
        let started = if grayscale {
            decompress.grayscale()
        } else {
            decompress.rgb()
        };
        let mut decompress = started.map_err(|e| {
            ConvertError::decode_failed(format!("mozjpeg color conversion failed: {e:?}"))
        })?;

        let width = decompress.width() as u32;
        let height = decompress.height() as u32;

        let samples: Vec<u8> = if grayscale {
            decompress.read_scanlines::<u8>()
        } else {
            decompress
                .read_scanlines::<[u8; 3]>()
                .map(|pixels| pixels.into_iter().flatten().collect())
        }
        .map_err(|e| {
            ConvertError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;

        let image = if grayscale {
            GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8)
        } else {
            RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8)
        };
        image.ok_or_else(|| ConvertError::decode_failed("mozjpeg: failed to create image from raw data"))
    })
}

/// Decode still WebP with libwebp; animated files go through the image crate.
pub fn decode_webp_libwebp(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        let features = BitstreamFeatures::new(data)
            .ok_or_else(|| ConvertError::decode_failed("webp: failed to read bitstream features"))?;

        if features.has_animation() {
            return image::load_from_memory(data).map_err(|e| {
                ConvertError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| ConvertError::decode_failed("webp: decode failed"))?;
        Ok(decoded.to_image())
    })
}

/// Decode with the image crate under the panic policy.
pub fn decode_with_image_crate(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data)
            .map_err(|e| ConvertError::decode_failed(format!("decode failed: {e}")))
    })
}

/// Decode a palette PNG without expanding it.
///
/// Returns `Ok(None)` for non-palette PNGs, and for palette PNGs whose tRNS
/// chunk has partial alpha (those cannot be expressed by a single transparent
/// index and are decoded as RGBA instead).
pub fn decode_indexed_png(data: &[u8]) -> EngineResult<Option<IndexedImage>> {
    run_with_panic_policy("decode:png-indexed", || {
        let mut decoder = png::Decoder::new(Cursor::new(data));
        decoder.set_transformations(png::Transformations::IDENTITY);
        let mut reader = decoder
            .read_info()
            .map_err(|e| ConvertError::decode_failed(format!("png: {e}")))?;

        let (width, height, bit_depth, palette, trns) = {
            let info = reader.info();
            if info.color_type != png::ColorType::Indexed {
                return Ok(None);
            }
            let palette = info
                .palette
                .as_ref()
                .map(|p| p.to_vec())
                .ok_or_else(|| ConvertError::decode_failed("png: indexed image without PLTE"))?;
            (
                info.width,
                info.height,
                info.bit_depth as u8,
                palette,
                info.trns.as_ref().map(|t| t.to_vec()),
            )
        };

        let transparent = match trns.as_deref() {
            None => None,
            Some(alphas) if alphas.iter().all(|&a| a == 0 || a == 255) => {
                let mut clear = alphas.iter().enumerate().filter(|&(_, &a)| a == 0);
                match (clear.next(), clear.next()) {
                    (first, None) => first.map(|(i, _)| i as u8),
                    // several transparent entries cannot share one index
                    _ => return Ok(None),
                }
            }
            Some(_) => return Ok(None),
        };

        let mut raw = vec![0u8; reader.output_buffer_size()];
        let frame = reader
            .next_frame(&mut raw)
            .map_err(|e| ConvertError::decode_failed(format!("png: {e}")))?;

        let indices = unpack_indices(&raw, frame.line_size, width, height, bit_depth);
        let palette = palette
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect::<Vec<_>>();

        IndexedImage::new(width, height, indices, palette, transparent).map(Some)
    })
}

/// Expand packed 1/2/4/8-bit rows to one index byte per pixel.
fn unpack_indices(raw: &[u8], line_size: usize, width: u32, height: u32, bit_depth: u8) -> Vec<u8> {
    let width = width as usize;
    let mut out = Vec::with_capacity(width * height as usize);
    let per_byte = 8 / bit_depth.max(1) as usize;
    let mask = ((1u16 << bit_depth) - 1) as u8;
    for row in raw.chunks(line_size).take(height as usize) {
        if bit_depth == 8 {
            out.extend_from_slice(&row[..width]);
            continue;
        }
        for x in 0..width {
            let byte = row[x / per_byte];
            let shift = 8 - bit_depth as usize * (x % per_byte + 1);
            out.push((byte >> shift) & mask);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ColorMode;
    use image::{GenericImageView, Rgb};

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |_, _| Rgb([0, 0, 0]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn encode_palette_png(bit_depth: png::BitDepth, trns: Option<Vec<u8>>) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, 4, 1);
            encoder.set_color(png::ColorType::Indexed);
            encoder.set_depth(bit_depth);
            encoder.set_palette(vec![255, 0, 0, 0, 255, 0, 0, 0, 255]);
            if let Some(t) = trns {
                encoder.set_trns(t);
            }
            let mut writer = encoder.write_header().unwrap();
            let data: Vec<u8> = match bit_depth {
                // indices 0,1,2,1
                png::BitDepth::Eight => vec![0, 1, 2, 1],
                png::BitDepth::Two => vec![0b00_01_10_01],
                _ => unreachable!(),
            };
            writer.write_image_data(&data).unwrap();
        }
        out
    }

    #[test]
    fn decodes_rgb_png_with_hint() {
        let png = encode_png(3, 2);
        let buffer = decode_pixel_buffer(&png, &AdmissionLimits::default()).unwrap();
        assert_eq!(buffer.dimensions(), (3, 2));
        assert_eq!(buffer.color_mode(), ColorMode::Rgb);
        assert_eq!(buffer.format_hint(), Some(ImageFormat::Png));
    }

    #[test]
    fn rejects_oversized_dimensions_before_decode() {
        let png = encode_png(4097, 1);
        let err = decode_pixel_buffer(&png, &AdmissionLimits::default()).unwrap_err();
        assert!(matches!(err, ConvertError::DimensionExceedsLimit { .. }));
    }

    #[test]
    fn rejects_large_files() {
        let png = encode_png(8, 8);
        let limits = AdmissionLimits {
            max_file_size: 10,
            ..AdmissionLimits::default()
        };
        let err = decode_pixel_buffer(&png, &limits).unwrap_err();
        assert!(matches!(err, ConvertError::FileTooLarge { .. }));
    }

    #[test]
    fn rejects_garbage() {
        let err = decode_pixel_buffer(b"definitely not an image", &AdmissionLimits::default())
            .unwrap_err();
        assert!(matches!(err, ConvertError::DecodeFailed { .. }));
    }

    #[test]
    fn palette_png_keeps_palette_and_transparency() {
        let png = encode_palette_png(png::BitDepth::Eight, Some(vec![255, 0]));
        let buffer = decode_pixel_buffer(&png, &AdmissionLimits::default()).unwrap();
        assert_eq!(buffer.color_mode(), ColorMode::Palette);
        assert!(buffer.has_transparency_metadata());
        let rgba = buffer.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(rgba.get_pixel(1, 0).0, [0, 255, 0, 0]);
    }

    #[test]
    fn packed_palette_rows_are_unpacked() {
        let png = encode_palette_png(png::BitDepth::Two, None);
        let indexed = decode_indexed_png(&png).unwrap().unwrap();
        let rgb = indexed.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(rgb.get_pixel(2, 0).0, [0, 0, 255]);
        assert_eq!(rgb.get_pixel(3, 0).0, [0, 255, 0]);
    }

    #[test]
    fn partial_palette_alpha_falls_back_to_rgba() {
        let png = encode_palette_png(png::BitDepth::Eight, Some(vec![128]));
        assert!(decode_indexed_png(&png).unwrap().is_none());
        let buffer = decode_pixel_buffer(&png, &AdmissionLimits::default()).unwrap();
        assert_eq!(buffer.color_mode(), ColorMode::Rgba);
    }

    #[test]
    fn several_transparent_entries_fall_back_to_rgba() {
        let png = encode_palette_png(png::BitDepth::Eight, Some(vec![0, 0, 255]));
        assert!(decode_indexed_png(&png).unwrap().is_none());
        let buffer = decode_pixel_buffer(&png, &AdmissionLimits::default()).unwrap();
        assert_eq!(buffer.color_mode(), ColorMode::Rgba);
        let alphas: Vec<u8> = buffer.to_rgba8().pixels().map(|p| p.0[3]).collect();
        assert_eq!(alphas, vec![0, 0, 255, 0]);
    }

    #[test]
    fn grayscale_jpeg_stays_grayscale() {
        let mut jpeg = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, image::Luma([120])))
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let buffer = decode_pixel_buffer(&jpeg, &AdmissionLimits::default()).unwrap();
        assert_eq!(buffer.color_mode(), ColorMode::Grayscale);
        let value = buffer.to_rgb8().get_pixel(4, 4).0[0];
        assert!(value.abs_diff(120) <= 2, "{value}");
    }

    #[test]
    fn jpeg_routes_to_mozjpeg() {
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([9, 8, 7])))
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let img = decode_jpeg_mozjpeg(&jpeg).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(detect_format(&jpeg), Some(ImageFormat::Jpeg));
    }
}
