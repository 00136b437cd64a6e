// src/buffer.rs
//
// Decoded pixel buffer handed to the engine by the decode collaborator.
// Samples sit behind Arc: cloning a buffer never copies pixels, and nothing in
// the engine mutates samples in place.

use crate::engine::geometry::SquareCrop;
use crate::error::{ConvertError, Result};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage, RgbaImage};
use std::sync::Arc;

/// Channel layout of a pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorMode {
    Rgb,
    Rgba,
    Grayscale,
    GrayscaleAlpha,
    Palette,
    /// 16-bit and floating point layouts
    Other,
}

impl ColorMode {
    pub fn from_dynamic_image(img: &DynamicImage) -> Self {
        match img {
            DynamicImage::ImageRgb8(_) => ColorMode::Rgb,
            DynamicImage::ImageRgba8(_) => ColorMode::Rgba,
            DynamicImage::ImageLuma8(_) => ColorMode::Grayscale,
            DynamicImage::ImageLumaA8(_) => ColorMode::GrayscaleAlpha,
            _ => ColorMode::Other,
        }
    }

    /// Whether the layout has a dedicated alpha channel.
    pub fn has_alpha(&self) -> bool {
        matches!(self, ColorMode::Rgba | ColorMode::GrayscaleAlpha)
    }
}

/// Palette-indexed samples: one index byte per pixel into an RGB palette.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedImage {
    width: u32,
    height: u32,
    indices: Vec<u8>,
    palette: Vec<[u8; 3]>,
    transparent: Option<u8>,
}

impl IndexedImage {
    pub fn new(
        width: u32,
        height: u32,
        indices: Vec<u8>,
        palette: Vec<[u8; 3]>,
        transparent: Option<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ConvertError::invalid_dimensions(width, height));
        }
        if palette.is_empty() || palette.len() > 256 {
            return Err(ConvertError::invalid_pixel_data(format!(
                "palette must hold 1..=256 entries, got {}",
                palette.len()
            )));
        }
        let expected = width as usize * height as usize;
        if indices.len() != expected {
            return Err(ConvertError::invalid_pixel_data(format!(
                "expected {expected} palette indices, got {}",
                indices.len()
            )));
        }
        if let Some(max) = indices.iter().copied().max() {
            if max as usize >= palette.len() {
                return Err(ConvertError::invalid_pixel_data(format!(
                    "palette index {max} out of range for {} entries",
                    palette.len()
                )));
            }
        }
        Ok(Self {
            width,
            height,
            indices,
            palette,
            transparent,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn palette(&self) -> &[[u8; 3]] {
        &self.palette
    }

    pub fn transparent_index(&self) -> Option<u8> {
        self.transparent
    }

    fn index_at(&self, x: u32, y: u32) -> u8 {
        self.indices[y as usize * self.width as usize + x as usize]
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let idx = self.index_at(x, y);
            let [r, g, b] = self.palette[idx as usize];
            let a = if self.transparent == Some(idx) { 0 } else { 255 };
            image::Rgba([r, g, b, a])
        })
    }

    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            image::Rgb(self.palette[self.index_at(x, y) as usize])
        })
    }

    fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
        let mut indices = Vec::with_capacity(width as usize * height as usize);
        for row in y..y + height {
            let start = row as usize * self.width as usize + x as usize;
            indices.extend_from_slice(&self.indices[start..start + width as usize]);
        }
        Self {
            width,
            height,
            indices,
            palette: self.palette.clone(),
            transparent: self.transparent,
        }
    }
}

#[derive(Clone, Debug)]
enum Samples {
    Direct(Arc<DynamicImage>),
    Indexed(Arc<IndexedImage>),
}

/// Immutable decoded image: dimensions, color mode and samples.
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    samples: Samples,
    format_hint: Option<ImageFormat>,
}

impl PixelBuffer {
    /// Wrap directly addressed samples. Zero-sized images are rejected.
    pub fn from_dynamic(img: DynamicImage) -> Result<Self> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(ConvertError::invalid_dimensions(w, h));
        }
        Ok(Self {
            samples: Samples::Direct(Arc::new(img)),
            format_hint: None,
        })
    }

    pub fn from_indexed(img: IndexedImage) -> Self {
        Self {
            samples: Samples::Indexed(Arc::new(img)),
            format_hint: None,
        }
    }

    /// Record the format the samples were decoded from (informational).
    pub fn with_format_hint(mut self, hint: ImageFormat) -> Self {
        self.format_hint = Some(hint);
        self
    }

    pub fn format_hint(&self) -> Option<ImageFormat> {
        self.format_hint
    }

    pub fn width(&self) -> u32 {
        match &self.samples {
            Samples::Direct(img) => img.width(),
            Samples::Indexed(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &self.samples {
            Samples::Direct(img) => img.height(),
            Samples::Indexed(img) => img.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn color_mode(&self) -> ColorMode {
        match &self.samples {
            Samples::Direct(img) => ColorMode::from_dynamic_image(img),
            Samples::Indexed(_) => ColorMode::Palette,
        }
    }

    /// Palette images that declare a transparent index.
    pub fn has_transparency_metadata(&self) -> bool {
        match &self.samples {
            Samples::Direct(_) => false,
            Samples::Indexed(img) => img.transparent_index().is_some(),
        }
    }

    /// True when any channel or metadata can express transparency.
    pub fn carries_alpha(&self) -> bool {
        match &self.samples {
            Samples::Direct(img) => img.color().has_alpha(),
            Samples::Indexed(img) => img.transparent_index().is_some(),
        }
    }

    pub fn as_dynamic(&self) -> Option<&DynamicImage> {
        match &self.samples {
            Samples::Direct(img) => Some(img),
            Samples::Indexed(_) => None,
        }
    }

    pub fn as_indexed(&self) -> Option<&IndexedImage> {
        match &self.samples {
            Samples::Direct(_) => None,
            Samples::Indexed(img) => Some(img),
        }
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        match &self.samples {
            Samples::Direct(img) => img.to_rgba8(),
            Samples::Indexed(img) => img.to_rgba8(),
        }
    }

    pub fn to_rgb8(&self) -> RgbImage {
        match &self.samples {
            Samples::Direct(img) => img.to_rgb8(),
            Samples::Indexed(img) => img.to_rgb8(),
        }
    }

    /// Direct samples as an owned image. Palette data is expanded to RGBA when
    /// it declares a transparent index and to RGB otherwise.
    pub fn to_dynamic(&self) -> DynamicImage {
        match &self.samples {
            Samples::Direct(img) => img.as_ref().clone(),
            Samples::Indexed(img) if img.transparent_index().is_some() => {
                DynamicImage::ImageRgba8(img.to_rgba8())
            }
            Samples::Indexed(img) => DynamicImage::ImageRgb8(img.to_rgb8()),
        }
    }

    /// Square of side `min(width, height)` centered on the longer axis.
    /// Square buffers come back as a clone sharing the same samples.
    pub fn crop_square_center(&self) -> Result<Self> {
        let (w, h) = self.dimensions();
        let rect = SquareCrop::centered(w, h);
        if rect.is_identity(w, h) {
            return Ok(self.clone());
        }
        self.crop(rect.x, rect.y, rect.side, rect.side)
    }

    /// Derived buffer covering the given region. The source is left untouched.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Self> {
        let (w, h) = self.dimensions();
        if width == 0 || height == 0 || x.saturating_add(width) > w || y.saturating_add(height) > h
        {
            return Err(ConvertError::invalid_pixel_data(format!(
                "crop ({x}+{width}, {y}+{height}) exceeds {w}x{h}"
            )));
        }
        let samples = match &self.samples {
            Samples::Direct(img) => Samples::Direct(Arc::new(img.crop_imm(x, y, width, height))),
            Samples::Indexed(img) => Samples::Indexed(Arc::new(img.crop(x, y, width, height))),
        };
        Ok(Self {
            samples,
            format_hint: self.format_hint,
        })
    }

    /// Whether two buffers share the same sample storage.
    pub fn shares_samples_with(&self, other: &PixelBuffer) -> bool {
        match (&self.samples, &other.samples) {
            (Samples::Direct(a), Samples::Direct(b)) => Arc::ptr_eq(a, b),
            (Samples::Indexed(a), Samples::Indexed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl TryFrom<DynamicImage> for PixelBuffer {
    type Error = ConvertError;

    fn try_from(img: DynamicImage) -> Result<Self> {
        Self::from_dynamic(img)
    }
}
