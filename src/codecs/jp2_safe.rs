// src/codecs/jp2_safe.rs
//
// Safe abstractions for OpenJPEG FFI operations.
// RAII wrappers own the image, the compressor and the output stream so the
// encoder in engine/encoder.rs never touches a raw pointer.
#![deny(unsafe_op_in_unsafe_fn)]

use crate::error::ConvertError;
use openjpeg_sys as opj;
use std::ffi::{c_char, c_void, CStr};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::ptr::NonNull;
#[cfg(test)]
use std::{cell::Cell, thread_local};

#[cfg(test)]
thread_local! {
    static TRACK_DROPS: Cell<bool> = Cell::new(false);
    static LIVE_HANDLES: Cell<usize> = Cell::new(0);
}

#[cfg(test)]
fn track_alloc() {
    TRACK_DROPS.with(|flag| {
        if flag.get() {
            LIVE_HANDLES.with(|c| c.set(c.get() + 1));
        }
    });
}

#[cfg(test)]
fn track_free() {
    TRACK_DROPS.with(|flag| {
        if flag.get() {
            LIVE_HANDLES.with(|c| c.set(c.get().saturating_sub(1)));
        }
    });
}

/// Output chunk size handed to OpenJPEG (its default J2K chunk size).
const STREAM_CHUNK_SIZE: usize = 0x10_0000;
/// Upper bound on decomposition levels + 1.
const MAX_RESOLUTIONS: u32 = 6;

fn jp2_error(message: impl Into<std::borrow::Cow<'static, str>>) -> ConvertError {
    ConvertError::encode_failed("jp2", message)
}

/// Number of resolution levels that keeps every level at least one pixel wide.
pub fn resolution_count(width: u32, height: u32) -> u32 {
    let short_side = width.min(height).max(1);
    let levels = u32::BITS - short_side.leading_zeros();
    levels.clamp(1, MAX_RESOLUTIONS)
}

/// Owned `opj_image_t` holding 8-bit unsigned components.
pub struct SafeJp2Image {
    ptr: Option<NonNull<opj::opj_image_t>>,
}

impl SafeJp2Image {
    /// Build an image from interleaved 8-bit samples.
    ///
    /// `channels` is 1 (gray), 2 (gray+alpha), 3 (RGB) or 4 (RGBA); the last
    /// component of the 2- and 4-channel layouts is flagged as alpha.
    pub fn from_interleaved(
        width: u32,
        height: u32,
        channels: u32,
        samples: &[u8],
    ) -> Result<Self, ConvertError> {
        if width == 0 || height == 0 {
            return Err(jp2_error("width and height must be greater than 0"));
        }
        if !(1..=4).contains(&channels) {
            return Err(jp2_error(format!("unsupported channel count {channels}")));
        }
        let pixel_count = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| jp2_error("pixel count overflow"))?;
        if samples.len() != pixel_count * channels as usize {
            return Err(jp2_error(format!(
                "expected {} samples, got {}",
                pixel_count * channels as usize,
                samples.len()
            )));
        }

        let mut params: Vec<opj::opj_image_cmptparm_t> = (0..channels)
            .map(|_| {
                // SAFETY: plain C struct of integers; all-zero is a valid value.
                let mut p: opj::opj_image_cmptparm_t = unsafe { std::mem::zeroed() };
                p.dx = 1;
                p.dy = 1;
                p.w = width;
                p.h = height;
                p.prec = 8;
                p.sgnd = 0;
                p
            })
            .collect();

        let color_space = if channels >= 3 {
            opj::COLOR_SPACE::OPJ_CLRSPC_SRGB
        } else {
            opj::COLOR_SPACE::OPJ_CLRSPC_GRAY
        };

        // SAFETY: params holds `channels` initialised entries and outlives the call.
        let raw = unsafe { opj::opj_image_create(channels, params.as_mut_ptr(), color_space) };
        let ptr = NonNull::new(raw).ok_or_else(|| jp2_error("failed to create image"))?;
        #[cfg(test)]
        track_alloc();
        let image = Self { ptr: Some(ptr) };

        // SAFETY: opj_image_create allocated `channels` components, each with
        // a data buffer of width*height i32 samples.
        unsafe {
            let img = ptr.as_ptr();
            (*img).x0 = 0;
            (*img).y0 = 0;
            (*img).x1 = width;
            (*img).y1 = height;
            let comps = std::slice::from_raw_parts_mut((*img).comps, channels as usize);
            for (index, comp) in comps.iter_mut().enumerate() {
                if comp.data.is_null() {
                    return Err(jp2_error("component buffer was not allocated"));
                }
                let data = std::slice::from_raw_parts_mut(comp.data, pixel_count);
                for (dst, px) in data.iter_mut().zip(samples.chunks_exact(channels as usize)) {
                    *dst = px[index] as i32;
                }
            }
            if channels == 2 || channels == 4 {
                comps[channels as usize - 1].alpha = 1;
            }
        }

        Ok(image)
    }

    fn as_ptr(&self) -> Result<*mut opj::opj_image_t, ConvertError> {
        self.ptr
            .map(|p| p.as_ptr())
            .ok_or_else(|| jp2_error("image was released"))
    }
}

impl Drop for SafeJp2Image {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe { opj::opj_image_destroy(ptr.as_ptr()) };
            #[cfg(test)]
            track_free();
        }
    }
}

unsafe extern "C" fn log_opj_error(msg: *const c_char, _client_data: *mut c_void) {
    if msg.is_null() {
        return;
    }
    // SAFETY: OpenJPEG passes a NUL-terminated message.
    let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy();
    tracing::debug!(codec = "openjpeg", message = %text.trim_end(), "encoder error");
}

unsafe extern "C" fn log_opj_warning(msg: *const c_char, _client_data: *mut c_void) {
    if msg.is_null() {
        return;
    }
    // SAFETY: OpenJPEG passes a NUL-terminated message.
    let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy();
    tracing::trace!(codec = "openjpeg", message = %text.trim_end(), "encoder warning");
}

/// Owned JP2 compressor handle.
pub struct SafeJp2Compressor {
    ptr: Option<NonNull<opj::opj_codec_t>>,
}

impl SafeJp2Compressor {
    pub fn new() -> Result<Self, ConvertError> {
        let raw = unsafe { opj::opj_create_compress(opj::CODEC_FORMAT::OPJ_CODEC_JP2) };
        let ptr = NonNull::new(raw).ok_or_else(|| jp2_error("failed to create compressor"))?;
        #[cfg(test)]
        track_alloc();
        unsafe {
            opj::opj_set_error_handler(ptr.as_ptr(), Some(log_opj_error), std::ptr::null_mut());
            opj::opj_set_warning_handler(
                ptr.as_ptr(),
                Some(log_opj_warning),
                std::ptr::null_mut(),
            );
        }
        Ok(Self { ptr: Some(ptr) })
    }

    fn as_ptr(&self) -> Result<*mut opj::opj_codec_t, ConvertError> {
        self.ptr
            .map(|p| p.as_ptr())
            .ok_or_else(|| jp2_error("compressor was released"))
    }

    /// Configure a lossless single-layer encode for `image`.
    pub fn setup_lossless(&mut self, image: &SafeJp2Image) -> Result<(), ConvertError> {
        let codec = self.as_ptr()?;
        let raw_image = image.as_ptr()?;

        // SAFETY: opj_set_default_encoder_parameters initialises every field.
        let mut params: opj::opj_cparameters_t = unsafe { std::mem::zeroed() };
        unsafe { opj::opj_set_default_encoder_parameters(&mut params) };

        let (width, height, numcomps) =
            unsafe { ((*raw_image).x1, (*raw_image).y1, (*raw_image).numcomps) };

        // Reversible 5/3 wavelet, one layer at rate 0 (no truncation).
        params.irreversible = 0;
        params.tcp_numlayers = 1;
        params.tcp_rates[0] = 0.0;
        params.cp_disto_alloc = 1;
        params.numresolution = resolution_count(width, height) as _;
        params.tcp_mct = (numcomps >= 3) as _;

        let ok = unsafe { opj::opj_setup_encoder(codec, &mut params, raw_image) };
        if ok == 0 {
            return Err(jp2_error("encoder setup rejected parameters"));
        }
        Ok(())
    }

    /// Run the full compress sequence into `stream`.
    pub fn compress(
        &mut self,
        image: &SafeJp2Image,
        stream: &mut SafeOutputStream,
    ) -> Result<(), ConvertError> {
        let codec = self.as_ptr()?;
        let raw_image = image.as_ptr()?;
        let raw_stream = stream.as_ptr()?;

        if unsafe { opj::opj_start_compress(codec, raw_image, raw_stream) } == 0 {
            return Err(jp2_error("opj_start_compress failed"));
        }
        if unsafe { opj::opj_encode(codec, raw_stream) } == 0 {
            return Err(jp2_error("opj_encode failed"));
        }
        if unsafe { opj::opj_end_compress(codec, raw_stream) } == 0 {
            return Err(jp2_error("opj_end_compress failed"));
        }
        Ok(())
    }
}

impl Drop for SafeJp2Compressor {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe { opj::opj_destroy_codec(ptr.as_ptr()) };
            #[cfg(test)]
            track_free();
        }
    }
}

type Sink = Cursor<Vec<u8>>;

unsafe extern "C" fn sink_write(
    buffer: *mut c_void,
    nb_bytes: opj::OPJ_SIZE_T,
    user_data: *mut c_void,
) -> opj::OPJ_SIZE_T {
    // SAFETY: user_data is the boxed sink registered in SafeOutputStream::new,
    // which lives until the stream is destroyed.
    let sink = unsafe { &mut *(user_data as *mut Sink) };
    let data = unsafe { std::slice::from_raw_parts(buffer as *const u8, nb_bytes as usize) };
    match sink.write_all(data) {
        Ok(()) => nb_bytes,
        Err(_) => opj::OPJ_SIZE_T::MAX,
    }
}

unsafe extern "C" fn sink_seek(offset: opj::OPJ_OFF_T, user_data: *mut c_void) -> opj::OPJ_BOOL {
    let sink = unsafe { &mut *(user_data as *mut Sink) };
    if offset < 0 {
        return 0;
    }
    match sink.seek(SeekFrom::Start(offset as u64)) {
        Ok(_) => 1,
        Err(_) => 0,
    }
}

unsafe extern "C" fn sink_skip(offset: opj::OPJ_OFF_T, user_data: *mut c_void) -> opj::OPJ_OFF_T {
    let sink = unsafe { &mut *(user_data as *mut Sink) };
    match sink.seek(SeekFrom::Current(offset)) {
        Ok(_) => offset,
        Err(_) => -1,
    }
}

/// In-memory output stream. The sink is boxed so its address stays stable
/// while OpenJPEG holds it as user data.
pub struct SafeOutputStream {
    ptr: Option<NonNull<opj::opj_stream_t>>,
    sink: Box<Sink>,
}

impl SafeOutputStream {
    pub fn new() -> Result<Self, ConvertError> {
        // 0 = output stream
        let raw = unsafe { opj::opj_stream_create(STREAM_CHUNK_SIZE as _, 0) };
        let ptr = NonNull::new(raw).ok_or_else(|| jp2_error("failed to create output stream"))?;
        #[cfg(test)]
        track_alloc();
        let mut stream = Self {
            ptr: Some(ptr),
            sink: Box::new(Cursor::new(Vec::new())),
        };
        let user_data = stream.sink.as_mut() as *mut Sink as *mut c_void;
        unsafe {
            opj::opj_stream_set_write_function(ptr.as_ptr(), Some(sink_write));
            opj::opj_stream_set_seek_function(ptr.as_ptr(), Some(sink_seek));
            opj::opj_stream_set_skip_function(ptr.as_ptr(), Some(sink_skip));
            opj::opj_stream_set_user_data(ptr.as_ptr(), user_data, None);
        }
        Ok(stream)
    }

    fn as_ptr(&self) -> Result<*mut opj::opj_stream_t, ConvertError> {
        self.ptr
            .map(|p| p.as_ptr())
            .ok_or_else(|| jp2_error("stream was released"))
    }

    fn destroy_stream(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe { opj::opj_stream_destroy(ptr.as_ptr()) };
            #[cfg(test)]
            track_free();
        }
    }

    /// Close the stream and hand back everything written to it.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.destroy_stream();
        std::mem::take(self.sink.get_mut())
    }
}

impl Drop for SafeOutputStream {
    fn drop(&mut self) {
        self.destroy_stream();
    }
}

/// Encode interleaved 8-bit samples as a lossless JP2 file.
pub fn encode_lossless(
    width: u32,
    height: u32,
    channels: u32,
    samples: &[u8],
) -> Result<Vec<u8>, ConvertError> {
    let image = SafeJp2Image::from_interleaved(width, height, channels, samples)?;
    let mut compressor = SafeJp2Compressor::new()?;
    compressor.setup_lossless(&image)?;
    let mut stream = SafeOutputStream::new()?;
    compressor.compress(&image, &mut stream)?;
    // The stream must be closed before the codec goes away.
    let bytes = stream.into_bytes();
    drop(compressor);
    if bytes.is_empty() {
        return Err(jp2_error("encoder produced no output"));
    }
    Ok(bytes)
}
