// src/engine/tasks.rs
//
// Batch conversion: one source buffer, many requested formats.
// Requests run in parallel on the global pool against the same read-only
// buffer. A batch of N requests always yields N results, in request order.

use crate::buffer::PixelBuffer;
use crate::engine::api::{ConversionResult, Converter};
use crate::engine::pool;
use crate::format::FormatId;
use rayon::prelude::*;
use std::fmt::Write as _;

/// Results of one batch plus the counts the delivery side reports.
#[derive(Clone, Debug)]
pub struct BatchReport {
    pub results: Vec<ConversionResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_encoded()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// "N succeeded, M failed", then one "FORMAT: reason" line per failure.
    pub fn summary(&self) -> String {
        let mut out = format!("{} succeeded, {} failed", self.succeeded(), self.failed());
        for result in &self.results {
            if let Some(reason) = result.reason() {
                let _ = write!(out, "\n{}: {}", result.format_label(), reason);
            }
        }
        out
    }
}

impl Converter {
    /// Convert `buffer` into every format in `formats`.
    pub fn convert_batch(&self, buffer: &PixelBuffer, formats: &[FormatId]) -> BatchReport {
        self.run_batch(formats, |format| self.convert(buffer, *format))
    }

    /// Same as [`Converter::convert_batch`], with user-facing identifiers.
    pub fn convert_batch_named<S: AsRef<str> + Sync>(
        &self,
        buffer: &PixelBuffer,
        identifiers: &[S],
    ) -> BatchReport {
        self.run_batch(identifiers, |id| self.convert_named(buffer, id.as_ref()))
    }

    fn run_batch<T, F>(&self, requests: &[T], convert_one: F) -> BatchReport
    where
        T: Sync,
        F: Fn(&T) -> ConversionResult + Sync,
    {
        tracing::debug!(requests = requests.len(), "starting batch conversion");
        let results: Vec<ConversionResult> = match pool::get_pool() {
            Some(pool) => pool.install(|| requests.par_iter().map(&convert_one).collect()),
            None => requests.iter().map(&convert_one).collect(),
        };
        let report = BatchReport { results };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch conversion finished"
        );
        report
    }
}
