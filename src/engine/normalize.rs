// src/engine/normalize.rs
//
// Mode Normalizer and alpha flattening.
// Both are pure: they return the input (borrowed) or a new derived buffer.

use crate::buffer::{ColorMode, PixelBuffer};
use crate::engine::common::EngineResult;
use crate::error::ConvertError;
use image::{DynamicImage, RgbImage, RgbaImage};
use std::borrow::Cow;

/// Pick the mode a buffer is converted to when its own mode is not accepted.
///
/// Alpha is kept whenever the target allows it: RGBA wins over RGB, and RGB is
/// only chosen when the target has no alpha-bearing mode at all.
pub fn target_mode(mode: ColorMode, required: &[ColorMode]) -> Option<ColorMode> {
    if required.is_empty() || required.contains(&mode) {
        return None;
    }
    if required.contains(&ColorMode::Rgba) {
        return Some(ColorMode::Rgba);
    }
    if required.contains(&ColorMode::Rgb) {
        return Some(ColorMode::Rgb);
    }
    required.first().copied()
}

/// Coerce `buffer` into one of `required`, borrowing it when no work is needed.
pub fn normalize<'a>(
    buffer: &'a PixelBuffer,
    required: &[ColorMode],
) -> EngineResult<Cow<'a, PixelBuffer>> {
    let mode = buffer.color_mode();
    match target_mode(mode, required) {
        None => Ok(Cow::Borrowed(buffer)),
        Some(target) => {
            tracing::debug!(from = ?mode, to = ?target, "normalizing color mode");
            convert_mode(buffer, target).map(Cow::Owned)
        }
    }
}

/// Derive a buffer in `target` mode.
pub fn convert_mode(buffer: &PixelBuffer, target: ColorMode) -> EngineResult<PixelBuffer> {
    let converted = match target {
        ColorMode::Rgb => DynamicImage::ImageRgb8(buffer.to_rgb8()),
        ColorMode::Rgba => DynamicImage::ImageRgba8(buffer.to_rgba8()),
        ColorMode::Grayscale => DynamicImage::ImageLuma8(direct(buffer).to_luma8()),
        ColorMode::GrayscaleAlpha => DynamicImage::ImageLumaA8(direct(buffer).to_luma_alpha8()),
        ColorMode::Palette | ColorMode::Other => {
            return Err(ConvertError::invalid_pixel_data(format!(
                "cannot convert to {target:?}"
            )))
        }
    };
    let mut out = PixelBuffer::from_dynamic(converted)?;
    if let Some(hint) = buffer.format_hint() {
        out = out.with_format_hint(hint);
    }
    Ok(out)
}

fn direct(buffer: &PixelBuffer) -> Cow<'_, DynamicImage> {
    match buffer.as_dynamic() {
        Some(img) => Cow::Borrowed(img),
        None => Cow::Owned(DynamicImage::ImageRgba8(buffer.to_rgba8())),
    }
}

/// Produce an opaque RGB image for containers without alpha.
///
/// Alpha-bearing samples (RGBA, LA, palette with a transparent index) are
/// composited onto white using alpha as the blend mask. Palette images without
/// transparency and other opaque layouts are converted without compositing.
pub fn flatten_onto_white(buffer: &PixelBuffer) -> Cow<'_, RgbImage> {
    if let Some(DynamicImage::ImageRgb8(rgb)) = buffer.as_dynamic() {
        return Cow::Borrowed(rgb);
    }
    if buffer.carries_alpha() {
        tracing::debug!(mode = ?buffer.color_mode(), "flattening alpha onto white");
        Cow::Owned(composite_over_white(&buffer.to_rgba8()))
    } else {
        Cow::Owned(buffer.to_rgb8())
    }
}

/// Blend every pixel over an opaque white background of the same size.
pub fn composite_over_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        image::Rgb([blend(r, a), blend(g, a), blend(b, a)])
    })
}

#[inline]
fn blend(channel: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((channel as u32 * a + 255 * (255 - a) + 127) / 255) as u8
}
