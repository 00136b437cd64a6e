// src/engine/document.rs
//
// Single-page PDF writer: one /DeviceRGB image XObject painted across a page
// sized to the image's pixel dimensions.

use crate::buffer::PixelBuffer;
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::error::ConvertError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Embed `buffer` as a single PDF page. Alpha is dropped, not composited.
pub fn encode_pdf(buffer: &PixelBuffer) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:pdf", || {
        let rgb = buffer.to_rgb8();
        let (width, height) = rgb.dimensions();
        let compressed = deflate(rgb.as_raw())?;
        Ok(PdfWriter::single_image_page(width, height, &compressed))
    })
}

fn deflate(data: &[u8]) -> EngineResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| ConvertError::encode_failed("pdf", format!("deflate failed: {e}")))
}

/// Minimal object writer that records byte offsets for the xref table.
struct PdfWriter {
    out: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        // binary marker so transfer tools treat the file as binary
        out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
        Self {
            out,
            offsets: Vec::new(),
        }
    }

    fn begin_object(&mut self) {
        self.offsets.push(self.out.len());
        let id = self.offsets.len();
        self.out.extend_from_slice(format!("{id} 0 obj\n").as_bytes());
    }

    fn object(&mut self, body: &str) {
        self.begin_object();
        self.out.extend_from_slice(body.as_bytes());
        self.out.extend_from_slice(b"\nendobj\n");
    }

    fn stream_object(&mut self, dict: &str, data: &[u8]) {
        self.begin_object();
        self.out
            .extend_from_slice(format!("<< {dict} /Length {} >>\nstream\n", data.len()).as_bytes());
        self.out.extend_from_slice(data);
        self.out.extend_from_slice(b"\nendstream\nendobj\n");
    }

    fn finish(mut self, root: usize) -> Vec<u8> {
        let xref_at = self.out.len();
        let count = self.offsets.len() + 1;
        self.out
            .extend_from_slice(format!("xref\n0 {count}\n0000000000 65535 f \n").as_bytes());
        for offset in &self.offsets {
            self.out
                .extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        self.out.extend_from_slice(
            format!("trailer\n<< /Size {count} /Root {root} 0 R >>\nstartxref\n{xref_at}\n%%EOF\n")
                .as_bytes(),
        );
        self.out
    }

    fn single_image_page(width: u32, height: u32, image_data: &[u8]) -> Vec<u8> {
        let content = format!("q\n{width} 0 0 {height} 0 0 cm\n/Im0 Do\nQ");

        let mut pdf = Self::new();
        pdf.object("<< /Type /Catalog /Pages 2 0 R >>");
        pdf.object("<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
        pdf.object(&format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {width} {height}] \
             /Resources << /XObject << /Im0 5 0 R >> >> /Contents 4 0 R >>"
        ));
        pdf.stream_object("", content.as_bytes());
        pdf.stream_object(
            &format!(
                "/Type /XObject /Subtype /Image /Width {width} /Height {height} \
                 /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /FlateDecode"
            ),
            image_data,
        );
        pdf.finish(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use image::{DynamicImage, RgbImage, RgbaImage};
    use std::io::Read;

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn pdf_for(img: DynamicImage) -> Vec<u8> {
        encode_pdf(&PixelBuffer::from_dynamic(img).unwrap()).unwrap()
    }

    #[test]
    fn page_is_sized_to_pixels() {
        let pdf = pdf_for(DynamicImage::ImageRgb8(RgbImage::new(300, 200)));
        assert!(pdf.starts_with(b"%PDF-1.4"));
        assert!(pdf.ends_with(b"%%EOF\n"));
        assert!(find(&pdf, b"/MediaBox [0 0 300 200]").is_some());
        assert!(find(&pdf, b"/Width 300 /Height 200").is_some());
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let pdf = pdf_for(DynamicImage::ImageRgb8(RgbImage::new(8, 8)));
        let startxref = find(&pdf, b"startxref\n").unwrap() + 10;
        let tail = std::str::from_utf8(&pdf[startxref..]).unwrap();
        let xref_at: usize = tail.lines().next().unwrap().parse().unwrap();
        assert!(pdf[xref_at..].starts_with(b"xref\n0 6\n"));

        let table = std::str::from_utf8(&pdf[xref_at..startxref]).unwrap();
        for (i, line) in table.lines().skip(3).take(5).enumerate() {
            let offset: usize = line[..10].parse().unwrap();
            let header = format!("{} 0 obj", i + 1);
            assert!(pdf[offset..].starts_with(header.as_bytes()), "object {}", i + 1);
        }
    }

    #[test]
    fn image_stream_inflates_to_rgb_without_compositing() {
        let rgba = RgbaImage::from_pixel(2, 1, image::Rgba([10, 20, 30, 0]));
        let pdf = pdf_for(DynamicImage::ImageRgba8(rgba));
        let image_dict = find(&pdf, b"/Subtype /Image").unwrap();
        let start = image_dict + find(&pdf[image_dict..], b"stream\n").unwrap() + 7;
        let end = start + find(&pdf[start..], b"\nendstream").unwrap();
        let mut raw = Vec::new();
        ZlibDecoder::new(&pdf[start..end])
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(raw, vec![10, 20, 30, 10, 20, 30]);
    }
}
