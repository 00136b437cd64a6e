// src/engine/admission.rs
//
// Admission limits applied by the decode side before a buffer reaches the
// engine: source file size and per-axis dimensions.

use crate::error::ConvertError;

/// 20 MiB, the largest upload the front-end accepts.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;
/// Largest accepted width or height.
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_file_size: u64,
    pub max_dimension: u32,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl AdmissionLimits {
    /// No size or dimension ceiling (zero-sized images are still rejected).
    pub fn unbounded() -> Self {
        Self {
            max_file_size: u64::MAX,
            max_dimension: u32::MAX,
        }
    }

    pub fn enforce_source_len(&self, len: usize) -> Result<(), ConvertError> {
        let len_u64 = len as u64;
        if len_u64 > self.max_file_size {
            return Err(ConvertError::file_too_large(len_u64, self.max_file_size));
        }
        Ok(())
    }

    pub fn enforce_dimensions(&self, width: u32, height: u32) -> Result<(), ConvertError> {
        if width == 0 || height == 0 {
            return Err(ConvertError::invalid_dimensions(width, height));
        }
        let longest = width.max(height);
        if longest > self.max_dimension {
            return Err(ConvertError::dimension_exceeds_limit(
                longest,
                self.max_dimension,
            ));
        }
        Ok(())
    }

    /// Overlay `IMGCONV_MAX_DIMENSION` and `IMGCONV_MAX_FILE_SIZE`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_override::<u32>("IMGCONV_MAX_DIMENSION") {
            self.max_dimension = v;
        }
        if let Some(v) = env_override::<u64>("IMGCONV_MAX_FILE_SIZE") {
            self.max_file_size = v;
        }
        self
    }
}

/// Read and parse an environment variable; bad values are logged and ignored.
pub(crate) fn env_override<T: std::str::FromStr>(name: &'static str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparsable override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_front_end() {
        let limits = AdmissionLimits::default();
        assert!(limits.enforce_source_len(20 * 1024 * 1024).is_ok());
        let err = limits.enforce_source_len(20 * 1024 * 1024 + 1).unwrap_err();
        assert!(matches!(err, ConvertError::FileTooLarge { .. }));
    }

    #[test]
    fn dimensions_are_checked_per_axis() {
        let limits = AdmissionLimits::default();
        assert!(limits.enforce_dimensions(4096, 4096).is_ok());
        assert!(matches!(
            limits.enforce_dimensions(4097, 10),
            Err(ConvertError::DimensionExceedsLimit { dimension: 4097, max: 4096 })
        ));
        assert!(matches!(
            limits.enforce_dimensions(10, 0),
            Err(ConvertError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn unbounded_still_rejects_empty() {
        let limits = AdmissionLimits::unbounded();
        assert!(limits.enforce_dimensions(100_000, 3).is_ok());
        assert!(limits.enforce_dimensions(0, 3).is_err());
    }

    #[test]
    fn env_override_ignores_garbage() {
        std::env::set_var("IMGCONV_TEST_ADMISSION_GARBAGE", "lots");
        assert_eq!(env_override::<u32>("IMGCONV_TEST_ADMISSION_GARBAGE"), None);
        std::env::set_var("IMGCONV_TEST_ADMISSION_NUMBER", " 512 ");
        assert_eq!(env_override::<u32>("IMGCONV_TEST_ADMISSION_NUMBER"), Some(512));
    }
}
