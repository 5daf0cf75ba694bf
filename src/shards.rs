//! Shard descriptor creation with cache-line alignment
//!
//! Splits `[0, n)` into exactly `workers` contiguous index ranges, one per
//! worker. Shares are balanced to within one element, then interior
//! boundaries are snapped down to the alignment unit so that no two workers
//! write into the same cache line.

use std::fmt;
use std::ops::Range;

use thiserror::Error;

/// Errors that can occur during shard creation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    #[error("worker_count must be greater than 0, got {0}")]
    InvalidWorkers(usize),

    #[error("alignment must be greater than 0, got {0}")]
    InvalidAlignment(usize),

    #[error("shard {index} ({start}..{end}) overlaps or precedes the previous shard ending at {prev_end}")]
    OutOfOrder {
        index: usize,
        start: usize,
        end: usize,
        prev_end: usize,
    },

    #[error("shard {index} ({start}..{end}) out of bounds for length {len}")]
    OutOfBounds {
        index: usize,
        start: usize,
        end: usize,
        len: usize,
    },
}

/// A contiguous half-open range `[start, end)` owned by one worker
///
/// An empty shard (`start == end`) means "no work", not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shard {
    pub start: usize,
    pub end: usize,
}

impl Shard {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns the number of indices in this shard
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if this shard has no indices
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns an iterator over the indices in this shard
    pub fn indices(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

impl From<Range<usize>> for Shard {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Collection of shard descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    /// Total number of items being sharded
    pub n: usize,

    /// Alignment unit (in elements) applied to interior boundaries
    pub alignment: usize,

    /// The individual shards, one per worker, in index order
    pub shards: Vec<Shard>,
}

impl ShardDescriptor {
    /// Returns the number of shards
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Returns an iterator over the shards
    pub fn iter(&self) -> ShardIterator<'_> {
        ShardIterator {
            inner: self.shards.iter(),
        }
    }

    pub fn as_slice(&self) -> &[Shard] {
        &self.shards
    }

    /// Length of each shard, in worker order
    pub fn sizes(&self) -> Vec<usize> {
        self.shards.iter().map(Shard::len).collect()
    }

    /// Verify that all indices from 0 to n-1 are covered exactly once,
    /// in order, and that every start sits on the alignment grid
    pub fn verify_coverage(&self) -> bool {
        let alignment = self.alignment.max(1);
        let mut expected_start = 0;
        for shard in &self.shards {
            if shard.start != expected_start || shard.end < shard.start {
                return false;
            }
            if shard.start % alignment != 0 && shard.start != self.n {
                return false;
            }
            expected_start = shard.end;
        }
        expected_start == self.n
    }
}

impl<'a> IntoIterator for &'a ShardDescriptor {
    type Item = &'a Shard;
    type IntoIter = ShardIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over shards in a descriptor
pub struct ShardIterator<'a> {
    inner: std::slice::Iter<'a, Shard>,
}

impl<'a> Iterator for ShardIterator<'a> {
    type Item = &'a Shard;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a> ExactSizeIterator for ShardIterator<'a> {}

impl fmt::Display for ShardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Shard Plan")?;
        writeln!(f, "==========")?;
        writeln!(
            f,
            "n = {}, workers = {}, alignment = {}",
            self.n,
            self.num_shards(),
            self.alignment
        )?;
        writeln!(f)?;
        writeln!(f, "{:>6}  {:>24}  {:>10}", "task", "range", "len")?;
        for (index, shard) in self.shards.iter().enumerate() {
            writeln!(
                f,
                "{:>6}  {:>24}  {:>10}",
                index,
                shard.to_string(),
                shard.len()
            )?;
        }
        Ok(())
    }
}

/// Balanced (pre-alignment) end of worker `i`'s share
///
/// The first `rem` workers take `base + 1` items, the rest take `base`.
fn nominal_boundary(i: usize, base: usize, rem: usize) -> usize {
    i * base + i.min(rem)
}

/// Create shard descriptors for parallel execution
///
/// # Arguments
///
/// * `n` - Total number of items to shard (may be 0)
/// * `workers` - Number of shards to produce (must be > 0)
/// * `alignment` - Interior boundaries are multiples of this (must be > 0)
///
/// # Returns
///
/// Exactly `workers` shards covering `[0, n)` with no gap and no overlap.
/// Surplus workers (when `workers > n`, or when alignment swallows a share)
/// receive empty shards.
///
/// # Example
///
/// ```
/// use shardjoin::{partition, Shard};
///
/// let desc = partition(7, 3, 1).unwrap();
/// assert_eq!(
///     desc.shards,
///     vec![Shard::new(0, 3), Shard::new(3, 5), Shard::new(5, 7)]
/// );
/// ```
pub fn partition(n: usize, workers: usize, alignment: usize) -> Result<ShardDescriptor, ShardError> {
    if workers == 0 {
        return Err(ShardError::InvalidWorkers(0));
    }
    if alignment == 0 {
        return Err(ShardError::InvalidAlignment(0));
    }

    let base = n / workers;
    let rem = n % workers;

    let mut shards = Vec::with_capacity(workers);
    let mut start = 0;
    for i in 1..=workers {
        let end = if i == workers {
            n
        } else {
            let aligned = nominal_boundary(i, base, rem) / alignment * alignment;
            aligned.max(start)
        };
        shards.push(Shard { start, end });
        start = end;
    }

    Ok(ShardDescriptor {
        n,
        alignment,
        shards,
    })
}

/// Check that `shards` are ordered, disjoint and inside `[0, len)`
///
/// Gaps are allowed; the executor only needs to hand out non-overlapping
/// chunks.
pub fn validate_shards(shards: &[Shard], len: usize) -> Result<(), ShardError> {
    let mut prev_end = 0;
    for (index, shard) in shards.iter().enumerate() {
        if shard.end > len || shard.start > shard.end {
            return Err(ShardError::OutOfBounds {
                index,
                start: shard.start,
                end: shard.end,
                len,
            });
        }
        if shard.start < prev_end {
            return Err(ShardError::OutOfOrder {
                index,
                start: shard.start,
                end: shard.end,
                prev_end,
            });
        }
        prev_end = shard.end;
    }
    Ok(())
}
