// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Provides the engine result alias and the panic capture policy.

use crate::error::ConvertError;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Always use ConvertError so failures keep their category.
pub type EngineResult<T> = std::result::Result<T, ConvertError>;

/// Run a codec call and turn a panic into `InternalPanic`.
///
/// Encoders are third-party code; a panic inside one must come back to the
/// orchestrator as an ordinary failure instead of unwinding through it.
pub fn run_with_panic_policy<T, F>(label: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::error!(stage = label, panic = %detail, "codec panicked");
            Err(ConvertError::internal_panic(format!("{label}: {detail}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_results_through() {
        let ok: EngineResult<u8> = run_with_panic_policy("test", || Ok(7));
        assert_eq!(ok.unwrap(), 7);
        let err: EngineResult<u8> =
            run_with_panic_policy("test", || Err(ConvertError::encode_failed("png", "nope")));
        assert!(matches!(err, Err(ConvertError::EncodeFailed { .. })));
    }

    #[test]
    fn captures_panics() {
        let result: EngineResult<()> = run_with_panic_policy("encode:test", || panic!("boom"));
        match result {
            Err(ConvertError::InternalPanic { message }) => {
                assert!(message.contains("encode:test"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
