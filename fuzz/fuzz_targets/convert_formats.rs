#![no_main]

//! Fuzz target for the conversion engine.
//! Builds a buffer in an arbitrary color mode (including palette data) and
//! converts it to an arbitrary target; only panics and crashes matter.

use arbitrary::{Arbitrary, Unstructured};
use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use imgconv::{convert, FormatId, IndexedImage, PixelBuffer};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct ConvertSeed {
    format: u8,
    mode: u8,
    width: u8,
    height: u8,
    transparent: Option<u8>,
}

fn fill(data: &[u8], len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| data.get(i % data.len().max(1)).copied().unwrap_or(128))
        .collect()
}

fn build_buffer(seed: &ConvertSeed, data: &[u8]) -> Option<PixelBuffer> {
    // Limit dimensions to avoid OOM (max 96x96)
    let w = (seed.width as u32 % 96).max(1);
    let h = (seed.height as u32 % 96).max(1);
    let n = (w * h) as usize;
    let img = match seed.mode % 5 {
        0 => DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, fill(data, n * 3))?),
        1 => DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, fill(data, n * 4))?),
        2 => DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, fill(data, n))?),
        3 => DynamicImage::ImageLumaA8(GrayAlphaImage::from_raw(w, h, fill(data, n * 2))?),
        _ => {
            let palette: Vec<[u8; 3]> = fill(data, 48)
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect();
            let indices = fill(data, n).into_iter().map(|i| i % 16).collect();
            let transparent = seed.transparent.map(|t| t % 16);
            let indexed = IndexedImage::new(w, h, indices, palette, transparent).ok()?;
            return Some(PixelBuffer::from_indexed(indexed));
        }
    };
    PixelBuffer::from_dynamic(img).ok()
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 6 {
        return;
    }

    let mut unstructured = Unstructured::new(data);
    let seed = match ConvertSeed::arbitrary(&mut unstructured) {
        Ok(s) => s,
        Err(_) => return,
    };
    let Some(buffer) = build_buffer(&seed, data) else {
        return;
    };

    let format = FormatId::ALL[seed.format as usize % FormatId::ALL.len()];
    let _ = convert(&buffer, format);
});
