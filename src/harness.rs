//! Configured entry point tying the partitioner to the executor

use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::exec::{self, BatchResult};
use crate::shards::{partition, Shard, ShardDescriptor, ShardError};

/// Partitions a resource per its [`HarnessConfig`] and runs one worker per shard
///
/// # Example
///
/// ```
/// use shardjoin::{Harness, HarnessConfig};
///
/// let harness = Harness::new(HarnessConfig::with_workers(4));
/// let mut buf = vec![0u64; 1000];
/// let batch = harness
///     .run_slice(&mut buf, |i| i as u64, |_, chunk, seed| {
///         chunk.fill(seed);
///         Ok::<_, std::convert::Infallible>(chunk.len())
///     })
///     .unwrap();
///
/// assert_eq!(batch.outcomes().iter().sum::<usize>(), 1000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Shards for a resource of `len` elements of `T`
    ///
    /// Fails with `InvalidAlignment(0)` when `alignment_bytes` is zero.
    pub fn plan<T>(&self, len: usize) -> Result<ShardDescriptor, ShardError> {
        let alignment = self.config.alignment_for::<T>()?;
        partition(len, self.config.workers, alignment)
    }

    /// Partition `data` and run `body` on each chunk concurrently
    pub fn run_slice<T, S, R, E, M, B>(
        &self,
        data: &mut [T],
        make_state: M,
        body: B,
    ) -> Result<BatchResult<R>, HarnessError<E>>
    where
        T: Send,
        M: Fn(usize) -> S + Sync,
        B: Fn(Shard, &mut [T], S) -> Result<R, E> + Sync,
        R: Send,
        E: Send,
    {
        let desc = self.plan::<T>(data.len())?;
        debug!(
            n = desc.n,
            workers = desc.num_shards(),
            alignment = desc.alignment,
            "planned shards"
        );
        exec::run_slice_sized(data, &desc.shards, self.config.stack_size, make_state, body)
    }

    /// Partition `[0, n)` and run `body` on each range; no resource is handed out
    ///
    /// Ranges without a resource are not aligned: `alignment_bytes` is ignored
    /// and the split is the plain balanced one.
    pub fn run_ranges<S, R, E, M, B>(
        &self,
        n: usize,
        make_state: M,
        body: B,
    ) -> Result<BatchResult<R>, HarnessError<E>>
    where
        M: Fn(usize) -> S + Sync,
        B: Fn(Shard, S) -> Result<R, E> + Sync,
        R: Send,
        E: Send,
    {
        let desc = partition(n, self.config.workers, 1)?;
        exec::run_sized(&desc.shards, self.config.stack_size, make_state, body)
    }

    /// Single-threaded baseline over all of `data`
    pub fn run_serial<T, S, R, E, M, B>(
        &self,
        data: &mut [T],
        make_state: M,
        body: B,
    ) -> Result<BatchResult<R>, HarnessError<E>>
    where
        M: FnOnce(usize) -> S,
        B: FnOnce(Shard, &mut [T], S) -> Result<R, E>,
    {
        exec::run_serial(data, make_state, body)
    }
}
