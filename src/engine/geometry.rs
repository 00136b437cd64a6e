// src/engine/geometry.rs
//
// Geometry Policy: icon resolution selection, centered square crop and
// Lanczos resampling.

use crate::buffer::PixelBuffer;
use crate::engine::common::EngineResult;
use crate::error::ConvertError;
use fast_image_resize::{self as fir, PixelType, ResizeOptions};
use image::{DynamicImage, RgbImage, RgbaImage};

/// Smallest icon resolution ever emitted.
pub const MIN_ICON_SIZE: u32 = 16;
/// Largest icon resolution ever emitted (ICO directory entries are one byte).
pub const MAX_ICON_SIZE: u32 = 256;

/// Standard resolutions, largest first.
const ICON_THRESHOLDS: [u32; 4] = [256, 128, 64, 32];

/// Pick the single icon resolution for an image whose short side is `base`.
pub fn icon_size(base: u32) -> u32 {
    ICON_THRESHOLDS
        .iter()
        .copied()
        .find(|&threshold| base >= threshold)
        .unwrap_or_else(|| base.max(MIN_ICON_SIZE))
}

/// Resolution used by the simplified icon path.
///
/// Clamped at the bottom too so tiny sources never produce an icon under 16px.
pub fn fallback_icon_size(base: u32) -> u32 {
    base.min(MAX_ICON_SIZE).max(MIN_ICON_SIZE)
}

/// Square region centered on the longer axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SquareCrop {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

impl SquareCrop {
    pub fn centered(width: u32, height: u32) -> Self {
        let side = width.min(height);
        Self {
            x: (width - side) / 2,
            y: (height - side) / 2,
            side,
        }
    }

    pub fn is_identity(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.side == width && self.side == height
    }
}

/// Center-crop to a square; square inputs are returned as a cheap clone.
pub fn crop_to_square(buffer: &PixelBuffer) -> EngineResult<PixelBuffer> {
    let (w, h) = buffer.dimensions();
    let crop = SquareCrop::centered(w, h);
    if !crop.is_identity(w, h) {
        tracing::debug!(
            width = w,
            height = h,
            x = crop.x,
            y = crop.y,
            side = crop.side,
            "square crop"
        );
    }
    buffer.crop_square_center()
}

/// Resample `img` to a `side`x`side` square with Lanczos3.
///
/// RGB8 keeps its layout; everything else is resampled as RGBA8, with alpha
/// premultiplied around the convolution so transparent pixels do not bleed.
pub fn resize_square(img: &DynamicImage, side: u32) -> EngineResult<DynamicImage> {
    let (src_width, src_height) = (img.width(), img.height());
    let failed =
        |reason: String| ConvertError::resize_failed((src_width, src_height), (side, side), reason);
    if src_width == 0 || src_height == 0 || side == 0 {
        return Err(failed("invalid dimensions for resize".to_string()));
    }

    let (pixel_type, pixels) = match img {
        DynamicImage::ImageRgb8(rgb) => (PixelType::U8x3, rgb.as_raw().clone()),
        other => (PixelType::U8x4, other.to_rgba8().into_raw()),
    };
    let src = fir::images::Image::from_vec_u8(src_width, src_height, pixels, pixel_type)
        .map_err(|e| failed(format!("fir source image error: {e:?}")))?;
    let mut dst = fir::images::Image::new(side, side, pixel_type);

    let options = ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    fir::Resizer::new()
        .resize(&src, &mut dst, &options)
        .map_err(|e| failed(format!("fir resize error: {e:?}")))?;

    let resized = dst.into_vec();
    let image = match pixel_type {
        PixelType::U8x3 => RgbImage::from_raw(side, side, resized).map(DynamicImage::ImageRgb8),
        _ => RgbaImage::from_raw(side, side, resized).map(DynamicImage::ImageRgba8),
    };
    image.ok_or_else(|| failed("resized buffer has the wrong length".to_string()))
}
