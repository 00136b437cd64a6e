// src/engine/encoder.rs
//
// Generic Encoder and the per-container codec calls: JPEG (mozjpeg),
// PNG (image + oxipng), APNG (png), WebP (libwebp), BMP/TIFF/GIF (image),
// JPEG 2000 (OpenJPEG).

use crate::buffer::PixelBuffer;
use crate::engine::api::ConverterConfig;
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::normalize::normalize;
use crate::error::ConvertError;
use crate::format::FormatId;
use image::{DynamicImage, ImageFormat, RgbImage};
use mozjpeg::{ColorSpace, Compress};
use std::borrow::Cow;
use std::io::Cursor;

/// Encode `buffer` as `format` with no resizing or cropping.
///
/// The buffer is first coerced into one of the modes the container's codec
/// accepts; the input itself is never modified.
pub fn encode_generic(
    buffer: &PixelBuffer,
    format: FormatId,
    config: &ConverterConfig,
) -> EngineResult<Vec<u8>> {
    let normalized = normalize(buffer, format.accepted_modes())?;
    let img: Cow<'_, DynamicImage> = match normalized.as_dynamic() {
        Some(img) => Cow::Borrowed(img),
        None => Cow::Owned(normalized.to_dynamic()),
    };

    match format {
        FormatId::Png => encode_png(&img, config.png_optimization_level),
        FormatId::Apng => encode_apng(&img),
        FormatId::Webp => encode_webp(&img, config.webp_quality),
        FormatId::Bmp => encode_with_image_crate(&img, ImageFormat::Bmp, "bmp"),
        FormatId::Tif | FormatId::Tiff => encode_with_image_crate(&img, ImageFormat::Tiff, "tiff"),
        FormatId::Gif => encode_with_image_crate(&img, ImageFormat::Gif, "gif"),
        FormatId::Jp2 => encode_jp2(&img),
        FormatId::Jpeg => encode_jpeg(&img.to_rgb8(), config.jpeg_quality),
        FormatId::Ico | FormatId::Pdf => Err(ConvertError::encode_failed(
            format.identifier(),
            "format requires a specialized encoder",
        )),
    }
}

/// Encode RGB samples to baseline JPEG with optimized Huffman tables.
pub fn encode_jpeg(rgb: &RgbImage, quality: u8) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let quality = quality.clamp(1, 100);
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        if w == 0 || h == 0 {
            return Err(ConvertError::invalid_dimensions(w, h));
        }
        let expected_len = (w as usize) * (h as usize) * 3;
        if pixels.len() != expected_len {
            return Err(ConvertError::encode_failed(
                "jpeg",
                format!("expected {expected_len} bytes of RGB data, got {}", pixels.len()),
            ));
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(quality as f32);
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_optimize_coding(true);

        let mut output = Vec::with_capacity((w as usize * h as usize * 3 / 10).max(4096));
        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                ConvertError::encode_failed("jpeg", format!("mozjpeg: failed to start compress: {e:?}"))
            })?;

            for row in pixels.chunks(w as usize * 3) {
                writer.write_scanlines(row).map_err(|e| {
                    ConvertError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                ConvertError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }
        Ok(output)
    })
}

/// Encode to PNG using the image crate, then losslessly recompress with oxipng.
pub fn encode_png(img: &DynamicImage, optimization_level: u8) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| ConvertError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let options = oxipng::Options::from_preset(optimization_level.min(6));
        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            ConvertError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Encode a single-frame animated PNG: one acTL frame, played forever.
pub fn encode_apng(img: &DynamicImage) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:apng", || {
        let (color, data): (png::ColorType, &[u8]) = match img {
            DynamicImage::ImageRgb8(i) => (png::ColorType::Rgb, i.as_raw()),
            DynamicImage::ImageRgba8(i) => (png::ColorType::Rgba, i.as_raw()),
            DynamicImage::ImageLuma8(i) => (png::ColorType::Grayscale, i.as_raw()),
            DynamicImage::ImageLumaA8(i) => (png::ColorType::GrayscaleAlpha, i.as_raw()),
            other => {
                return Err(ConvertError::encode_failed(
                    "apng",
                    format!("unsupported pixel layout {:?}", other.color()),
                ))
            }
        };
        let apng_error = |e: png::EncodingError| ConvertError::encode_failed("apng", e.to_string());

        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, img.width(), img.height());
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_animated(1, 0).map_err(apng_error)?;
            let mut writer = encoder.write_header().map_err(apng_error)?;
            writer.write_image_data(data).map_err(apng_error)?;
            writer.finish().map_err(apng_error)?;
        }
        Ok(out)
    })
}

/// Encode to lossy WebP; RGBA input keeps its alpha plane.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let (w, h) = (img.width(), img.height());
        let rgba;
        let rgb;
        let encoder = match img {
            DynamicImage::ImageRgb8(i) => webp::Encoder::from_rgb(i.as_raw(), w, h),
            DynamicImage::ImageRgba8(i) => webp::Encoder::from_rgba(i.as_raw(), w, h),
            other if other.color().has_alpha() => {
                rgba = other.to_rgba8();
                webp::Encoder::from_rgba(rgba.as_raw(), w, h)
            }
            other => {
                rgb = other.to_rgb8();
                webp::Encoder::from_rgb(rgb.as_raw(), w, h)
            }
        };

        let mut config = webp::WebPConfig::new()
            .map_err(|_| ConvertError::internal_panic("failed to create WebPConfig"))?;
        config.lossless = 0;
        config.quality = quality.min(100) as f32;

        let mem = encoder
            .encode_advanced(&config)
            .map_err(|e| ConvertError::encode_failed("webp", format!("WebP encode failed: {e:?}")))?;
        Ok(mem.to_vec())
    })
}

/// Encode with one of the image crate's built-in writers.
pub fn encode_with_image_crate(
    img: &DynamicImage,
    format: ImageFormat,
    label: &'static str,
) -> EngineResult<Vec<u8>> {
    run_with_panic_policy(label, || {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format)
            .map_err(|e| ConvertError::encode_failed(label, e.to_string()))?;
        Ok(buf)
    })
}

/// Encode to lossless JPEG 2000 (JP2 container).
#[cfg(feature = "jp2")]
pub fn encode_jp2(img: &DynamicImage) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:jp2", || {
        let channels = match img {
            DynamicImage::ImageLuma8(_) => 1,
            DynamicImage::ImageLumaA8(_) => 2,
            DynamicImage::ImageRgb8(_) => 3,
            DynamicImage::ImageRgba8(_) => 4,
            other => {
                return Err(ConvertError::encode_failed(
                    "jp2",
                    format!("unsupported pixel layout {:?}", other.color()),
                ))
            }
        };
        crate::codecs::jp2_safe::encode_lossless(img.width(), img.height(), channels, img.as_bytes())
    })
}

#[cfg(not(feature = "jp2"))]
pub fn encode_jp2(_img: &DynamicImage) -> EngineResult<Vec<u8>> {
    Err(ConvertError::encode_failed(
        "jp2",
        "JPEG 2000 support requires the `jp2` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, GrayImage, Luma, RgbaImage};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn create_test_image_rgba(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, (x % 2 * 255) as u8])
        }))
    }

    fn buffer(img: DynamicImage) -> PixelBuffer {
        PixelBuffer::from_dynamic(img).unwrap()
    }

    #[test]
    fn test_encode_jpeg_produces_valid_jpeg() {
        let img = create_test_image(100, 100).to_rgb8();
        let result = encode_jpeg(&img, 90).unwrap();
        assert_eq!(&result[0..2], &[0xFF, 0xD8]);
        assert_eq!(&result[result.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_jpeg_is_deterministic() {
        let img = create_test_image(40, 30).to_rgb8();
        assert_eq!(encode_jpeg(&img, 90).unwrap(), encode_jpeg(&img, 90).unwrap());
    }

    #[test]
    fn test_encode_png_is_lossless() {
        let img = create_test_image_rgba(33, 17);
        let bytes = encode_png(&img, 2).unwrap();
        assert_eq!(&bytes[0..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn test_encode_apng_declares_single_frame() {
        let bytes = encode_apng(&create_test_image(20, 10)).unwrap();
        let pos = bytes
            .windows(4)
            .position(|w| w == b"acTL")
            .expect("acTL chunk");
        let num_frames = u32::from_be_bytes(bytes[pos + 4..pos + 8].try_into().unwrap());
        let num_plays = u32::from_be_bytes(bytes[pos + 8..pos + 12].try_into().unwrap());
        assert_eq!((num_frames, num_plays), (1, 0));
        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
        assert_eq!(decoded.dimensions(), (20, 10));
    }

    #[test]
    fn test_encode_webp_produces_valid_webp() {
        let bytes = encode_webp(&create_test_image(64, 48), 80).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn test_encode_webp_keeps_alpha() {
        let bytes = encode_webp(&create_test_image_rgba(16, 16), 80).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_generic_normalizes_grayscale_for_webp() {
        let gray = buffer(DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([99]))));
        let bytes = encode_generic(&gray, FormatId::Webp, &ConverterConfig::default()).unwrap();
        assert_eq!(&bytes[8..12], b"WEBP");
        // source buffer unchanged
        assert_eq!(gray.color_mode(), crate::buffer::ColorMode::Grayscale);
    }

    #[test]
    fn test_generic_tiff_and_bmp_round_trip_dimensions() {
        let src = buffer(create_test_image(30, 20));
        let config = ConverterConfig::default();
        for (format, magic) in [
            (FormatId::Tiff, &b"II*\0"[..]),
            (FormatId::Bmp, &b"BM"[..]),
            (FormatId::Gif, &b"GIF8"[..]),
        ] {
            let bytes = encode_generic(&src, format, &config).unwrap();
            assert!(bytes.starts_with(magic), "{format}");
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!(decoded.dimensions(), (30, 20), "{format}");
        }
    }

    #[test]
    fn test_generic_rejects_specialized_formats() {
        let src = buffer(create_test_image(4, 4));
        let err = encode_generic(&src, FormatId::Ico, &ConverterConfig::default()).unwrap_err();
        assert!(matches!(err, ConvertError::EncodeFailed { .. }));
    }

    #[cfg(feature = "jp2")]
    #[test]
    fn test_encode_jp2_grayscale_alpha() {
        let img = DynamicImage::ImageLumaA8(image::GrayAlphaImage::from_pixel(
            5,
            3,
            image::LumaA([10, 200]),
        ));
        let bytes = encode_jp2(&img).unwrap();
        assert_eq!(&bytes[4..8], b"jP  ");
    }
}
