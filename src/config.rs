//! Harness configuration
//!
//! Worker count and alignment live here so that "how many cores" and "how big
//! is a cache line" stay out of the partitioning arithmetic.

use std::num::NonZeroUsize;

use crate::shards::ShardError;

/// Worker count used when the platform cannot report its parallelism
pub const FALLBACK_WORKERS: usize = 4;

/// Typical cache-line size in bytes
pub const CACHE_LINE_BYTES: usize = 64;

/// Configuration for a [`Harness`](crate::Harness)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Number of workers (one shard and one thread each)
    /// Default: available hardware parallelism, or 4
    pub workers: usize,

    /// Byte boundary interior shard starts are aligned to
    /// Default: 64
    pub alignment_bytes: usize,

    /// Stack size for each worker thread, in bytes
    /// Default: None (platform default)
    pub stack_size: Option<usize>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            alignment_bytes: CACHE_LINE_BYTES,
            stack_size: None,
        }
    }
}

impl HarnessConfig {
    /// Create a configuration with the given worker count
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Set the alignment boundary in bytes
    pub fn with_alignment_bytes(mut self, alignment_bytes: usize) -> Self {
        self.alignment_bytes = alignment_bytes;
        self
    }

    /// Set the worker thread stack size in bytes
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Alignment expressed in elements of `T`
    ///
    /// A zero-byte boundary is rejected. Otherwise the result is never less
    /// than one: elements wider than the boundary, and zero-sized types,
    /// align to a single element.
    pub fn alignment_for<T>(&self) -> Result<usize, ShardError> {
        if self.alignment_bytes == 0 {
            return Err(ShardError::InvalidAlignment(0));
        }
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return Ok(1);
        }
        Ok((self.alignment_bytes / size).max(1))
    }
}

/// Available hardware parallelism, or [`FALLBACK_WORKERS`]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(FALLBACK_WORKERS)
}
