#![no_main]

use imgconv::{decode_pixel_buffer, AdmissionLimits};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let limits = AdmissionLimits {
        max_dimension: 1024,
        ..AdmissionLimits::default()
    };
    let _ = decode_pixel_buffer(data, &limits);
});
