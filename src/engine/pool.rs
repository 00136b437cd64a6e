// src/engine/pool.rs
//
// Global thread pool for batch conversion.
//
// One pool serves every batch instead of one pool per call: building a pool
// costs far more than the per-item scheduling overhead.
//
// Thread count:
// - `IMGCONV_THREADS` when set to a positive integer
// - otherwise std::thread::available_parallelism() (respects cgroup quotas)
// - MIN_THREADS when detection fails
//
// The pool is built lazily on first use; later changes to the environment
// have no effect.

use crate::engine::admission::env_override;
use rayon::ThreadPool;
use std::sync::OnceLock;

/// Minimum number of worker threads
const MIN_THREADS: usize = 1;

static GLOBAL_THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// Worker count the pool is (or will be) built with.
pub fn configured_threads() -> usize {
    env_override::<usize>("IMGCONV_THREADS")
        .filter(|&n| n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(MIN_THREADS)
        })
        .max(MIN_THREADS)
}

/// The shared pool, or `None` if no pool could be built at all.
pub fn get_pool() -> Option<&'static ThreadPool> {
    GLOBAL_THREAD_POOL
        .get_or_init(|| {
            let num_threads = configured_threads();
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|i| format!("imgconv-{i}"))
                .build()
                .or_else(|e| {
                    tracing::warn!(
                        threads = num_threads,
                        error = %e,
                        "failed to build worker pool, retrying with minimal size"
                    );
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(MIN_THREADS)
                        .build()
                })
                .map_err(|e| tracing::error!(error = %e, "no worker pool available"))
                .ok()
        })
        .as_ref()
}
