//! Fork-join execution over shards
//!
//! Every shard gets its own scoped OS thread. Per-task state is built inside
//! the task by `make_state`, so nothing but the read-only closures is shared
//! between workers. All handles are joined before any result is inspected:
//! a failing task never causes another task to be abandoned, and a thread
//! the OS refuses to start stops further spawning without leaking the ones
//! already running.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{panic_message, HarnessError, TaskFailure};
use crate::shards::{validate_shards, Shard};

/// Outcome of a completed batch
///
/// `outcomes[i]` is the value returned by the task that ran shard `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult<R> {
    elapsed: Duration,
    outcomes: Vec<R>,
}

impl<R> BatchResult<R> {
    /// Wall-clock time from the first spawn to the last join
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_millis(&self) -> u128 {
        self.elapsed.as_millis()
    }

    /// Per-task outcomes in shard order
    pub fn outcomes(&self) -> &[R] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<R> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Transform every outcome, keeping the measured duration
    pub fn map<U, F>(self, f: F) -> BatchResult<U>
    where
        F: FnMut(R) -> U,
    {
        BatchResult {
            elapsed: self.elapsed,
            outcomes: self.outcomes.into_iter().map(f).collect(),
        }
    }
}

/// Runs one task per shard and waits for all of them
///
/// `make_state(i)` runs inside task `i` before `body`, so the state it
/// returns is private to that task. `body` receives the shard and the state.
///
/// # Errors
///
/// Returns `WorkerFailure` for the lowest-indexed shard whose body returned
/// `Err` or panicked, after every task has been joined. Returns `Spawn` if
/// the OS refused a worker thread and no earlier task failed.
///
/// # Example
///
/// ```
/// use shardjoin::{partition, run};
///
/// let desc = partition(20, 4, 1).unwrap();
/// let batch = run(
///     &desc.shards,
///     |_| 0u64,
///     |shard, mut counter| {
///         for _ in shard.indices() {
///             counter += 1;
///         }
///         Ok::<_, std::convert::Infallible>(counter)
///     },
/// )
/// .unwrap();
/// assert_eq!(batch.outcomes(), &[5, 5, 5, 5]);
/// ```
pub fn run<S, R, E, M, B>(
    shards: &[Shard],
    make_state: M,
    body: B,
) -> Result<BatchResult<R>, HarnessError<E>>
where
    M: Fn(usize) -> S + Sync,
    B: Fn(Shard, S) -> Result<R, E> + Sync,
    R: Send,
    E: Send,
{
    run_sized(shards, None, make_state, body)
}

/// [`run`] with an explicit worker stack size
pub(crate) fn run_sized<S, R, E, M, B>(
    shards: &[Shard],
    stack_size: Option<usize>,
    make_state: M,
    body: B,
) -> Result<BatchResult<R>, HarnessError<E>>
where
    M: Fn(usize) -> S + Sync,
    B: Fn(Shard, S) -> Result<R, E> + Sync,
    R: Send,
    E: Send,
{
    let len = shards.iter().map(|shard| shard.end).max().unwrap_or(0);
    fork_join(shards.to_vec(), len, stack_size, make_state, body)
}

/// Runs one task per shard, handing each task the matching chunk of `data`
///
/// The slice is split into disjoint `&mut` chunks up front, so a task can only
/// ever write inside its own shard.
///
/// # Errors
///
/// `InvalidArgument` if the shards are out of order, overlap, or exceed
/// `data.len()` (checked before any task starts). Otherwise as [`run`].
pub fn run_slice<T, S, R, E, M, B>(
    data: &mut [T],
    shards: &[Shard],
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
    run_slice_sized(data, shards, None, make_state, body)
}

/// [`run_slice`] with an explicit worker stack size
pub(crate) fn run_slice_sized<T, S, R, E, M, B>(
    data: &mut [T],
    shards: &[Shard],
    stack_size: Option<usize>,
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
    let len = data.len();
    validate_shards(shards, len)?;

    let items: Vec<(Shard, &mut [T])> = shards
        .iter()
        .copied()
        .zip(split_disjoint(data, shards))
        .collect();

    let body = &body;
    fork_join(items, len, stack_size, make_state, move |(shard, chunk), state| {
        body(shard, chunk, state)
    })
}

/// Single-threaded baseline: runs `body` once over all of `data` in the
/// calling thread, timed the same way as a parallel batch
///
/// A panic in `body` unwinds into the caller.
pub fn run_serial<T, S, R, E, M, B>(
    data: &mut [T],
    make_state: M,
    body: B,
) -> Result<BatchResult<R>, HarnessError<E>>
where
    M: FnOnce(usize) -> S,
    B: FnOnce(Shard, &mut [T], S) -> Result<R, E>,
{
    let shard = Shard::new(0, data.len());
    let started = Instant::now();
    let result = body(shard, data, make_state(0));
    let elapsed = started.elapsed();

    match result {
        Ok(outcome) => Ok(BatchResult {
            elapsed,
            outcomes: vec![outcome],
        }),
        Err(e) => Err(HarnessError::WorkerFailure {
            index: 0,
            failure: TaskFailure::Error(e),
        }),
    }
}

/// Carves `data` into one chunk per shard; shards must already be validated
fn split_disjoint<'a, T>(data: &'a mut [T], shards: &[Shard]) -> Vec<&'a mut [T]> {
    let mut rest = data;
    let mut offset = 0;
    let mut chunks = Vec::with_capacity(shards.len());

    for shard in shards {
        let tail = std::mem::take(&mut rest);
        let (_, tail) = tail.split_at_mut(shard.start - offset);
        let (chunk, tail) = tail.split_at_mut(shard.len());
        chunks.push(chunk);
        rest = tail;
        offset = shard.end;
    }

    chunks
}

fn fork_join<I, S, R, E, M, F>(
    items: Vec<I>,
    len: usize,
    stack_size: Option<usize>,
    make_state: M,
    task: F,
) -> Result<BatchResult<R>, HarnessError<E>>
where
    I: Send,
    M: Fn(usize) -> S + Sync,
    F: Fn(I, S) -> Result<R, E> + Sync,
    R: Send,
    E: Send,
{
    let tasks = items.len();
    debug!(tasks, len, "forking batch");

    let started = Instant::now();
    let (joined, refused): (Vec<thread::Result<Result<R, E>>>, Option<(usize, io::Error)>) =
        thread::scope(|s| {
            let make_state = &make_state;
            let task = &task;

            let mut handles = Vec::with_capacity(tasks);
            let mut refused = None;

            for (index, item) in items.into_iter().enumerate() {
                let mut builder = thread::Builder::new().name(format!("shard-{}", index));
                if let Some(size) = stack_size {
                    builder = builder.stack_size(size);
                }

                let spawned = builder.spawn_scoped(s, move || {
                    let state = make_state(index);
                    task(item, state)
                });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        refused = Some((index, err));
                        break;
                    }
                }
            }

            // Join barrier: every started handle, in order, before inspecting results.
            let joined = handles.into_iter().map(|h| h.join()).collect();
            (joined, refused)
        });
    let elapsed = started.elapsed();

    debug!(tasks, elapsed_ms = elapsed.as_millis() as u64, "batch joined");

    let mut outcomes = Vec::with_capacity(tasks);
    let mut first_failure = None;

    for (index, result) in joined.into_iter().enumerate() {
        let failure = match result {
            Ok(Ok(outcome)) => {
                outcomes.push(outcome);
                continue;
            }
            Ok(Err(e)) => TaskFailure::Error(e),
            Err(payload) => TaskFailure::Panicked(panic_message(payload.as_ref())),
        };

        warn!(index, panicked = failure.is_panic(), "task failed");
        if first_failure.is_none() {
            first_failure = Some(HarnessError::WorkerFailure { index, failure });
        }
    }

    if let Some((index, err)) = refused {
        warn!(index, error = %err, "worker thread refused by the OS");
        if first_failure.is_none() {
            first_failure = Some(HarnessError::spawn(index, &err));
        }
    }

    match first_failure {
        Some(err) => Err(err),
        None => Ok(BatchResult { elapsed, outcomes }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shards::{partition, ShardError};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn count(shard: Shard, mut counter: u64) -> Result<u64, Infallible> {
        for _ in shard.indices() {
            counter += 1;
        }
        Ok(counter)
    }

    #[test]
    fn test_counters_in_shard_order() {
        let desc = partition(20, 4, 1).unwrap();
        let batch = run(&desc.shards, |_| 0u64, |_, mut counter| {
            for _ in 0..1000 {
                counter += 1;
            }
            Ok::<_, Infallible>(counter)
        })
        .unwrap();

        assert_eq!(batch.outcomes(), &[1000, 1000, 1000, 1000]);
    }

    #[test]
    fn test_counters_isolated_under_many_workers() {
        let k = 10_000;
        let desc = partition(k * 16, 16, 1).unwrap();
        let batch = run(&desc.shards, |_| 0u64, count).unwrap();

        assert_eq!(batch.len(), 16);
        assert!(batch.outcomes().iter().all(|&v| v == k as u64));
    }

    #[test]
    fn test_single_worker_matches_direct_call() {
        let mut direct = vec![0u32; 37];
        for (i, x) in direct.iter_mut().enumerate() {
            *x = (i * 3) as u32;
        }

        let mut via_harness = vec![0u32; 37];
        let desc = partition(37, 1, 1).unwrap();
        let batch = run_slice(&mut via_harness, &desc.shards, |_| (), |shard, chunk, ()| {
            for (i, x) in shard.indices().zip(chunk.iter_mut()) {
                *x = (i * 3) as u32;
            }
            Ok::<_, Infallible>(chunk.len())
        })
        .unwrap();

        assert_eq!(via_harness, direct);
        assert_eq!(batch.outcomes(), &[37]);
    }

    #[test]
    fn test_run_slice_writes_own_range_only() {
        let mut data = vec![usize::MAX; 100];
        let desc = partition(100, 4, 8).unwrap();

        run_slice(&mut data, &desc.shards, |i| i, |shard, chunk, task| {
            assert_eq!(chunk.len(), shard.len());
            chunk.fill(task);
            Ok::<_, Infallible>(())
        })
        .unwrap();

        for (task, shard) in desc.iter().enumerate() {
            assert!(data[shard.as_range()].iter().all(|&v| v == task));
        }
    }

    #[test]
    fn test_empty_shards_still_get_tasks() {
        let spawned = AtomicUsize::new(0);
        let desc = partition(2, 6, 1).unwrap();

        let batch = run(
            &desc.shards,
            |_| spawned.fetch_add(1, Ordering::SeqCst),
            |shard, _| Ok::<_, Infallible>(shard.len()),
        )
        .unwrap();

        assert_eq!(spawned.load(Ordering::SeqCst), 6);
        assert_eq!(batch.outcomes(), &[1, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_state_built_inside_task() {
        let caller = thread::current().id();
        let desc = partition(8, 4, 1).unwrap();

        let batch = run(
            &desc.shards,
            |_| thread::current().id(),
            |_, built_on| {
                let here = thread::current().id();
                Ok::<_, Infallible>(built_on == here && here != caller)
            },
        )
        .unwrap();

        assert!(batch.outcomes().iter().all(|&ok| ok));
    }

    #[test]
    fn test_failure_joins_everyone_and_reports_index() {
        let mut data = vec![0u8; 40];
        let desc = partition(40, 4, 1).unwrap();
        let finished = AtomicUsize::new(0);

        let err = run_slice(&mut data, &desc.shards, |i| i, |_, chunk, task| {
            if task == 2 {
                return Err(format!("task {} refused", task));
            }
            chunk.fill(1);
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap_err();

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(
            err,
            HarnessError::WorkerFailure {
                index: 2,
                failure: TaskFailure::Error("task 2 refused".to_string()),
            }
        );
        assert!(data[0..20].iter().all(|&b| b == 1));
        assert!(data[20..30].iter().all(|&b| b == 0));
        assert!(data[30..40].iter().all(|&b| b == 1));
    }

    #[test]
    fn test_lowest_failing_index_wins() {
        let desc = partition(40, 8, 1).unwrap();
        let err = run(&desc.shards, |i| i, |_, task| {
            if task >= 3 {
                Err(task)
            } else {
                Ok(task)
            }
        })
        .unwrap_err();

        assert_eq!(err.task_index(), Some(3));
    }

    #[test]
    fn test_panic_is_reported_not_propagated() {
        let desc = partition(4, 4, 1).unwrap();
        let err = run(&desc.shards, |i| i, |_, task| {
            if task == 1 {
                panic!("worker {} exploded", task);
            }
            Ok::<_, String>(task)
        })
        .unwrap_err();

        match err {
            HarnessError::WorkerFailure { index, failure } => {
                assert_eq!(index, 1);
                assert_eq!(failure, TaskFailure::Panicked("worker 1 exploded".into()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_bad_shards_rejected_before_spawn() {
        let mut data = vec![0u8; 10];
        let calls = AtomicUsize::new(0);
        let overlapping = [Shard::new(0, 6), Shard::new(5, 10)];

        let err = run_slice(&mut data, &overlapping, |_| (), |_, _, ()| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(())
        })
        .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::InvalidArgument(ShardError::OutOfOrder { index: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // A stack larger than the address space makes the OS refuse the thread.
    #[cfg(target_pointer_width = "64")]
    const UNMAPPABLE_STACK: usize = 1 << 50;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_refused_thread_is_an_error_not_a_panic() {
        let desc = partition(8, 4, 1).unwrap();
        let calls = AtomicUsize::new(0);

        let result = std::panic::catch_unwind(|| {
            run_sized(&desc.shards, Some(UNMAPPABLE_STACK), |i| i, |_, task| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(task)
            })
        });

        let err = result.expect("refused spawn must not panic").unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { index: 0, .. }));
        assert_eq!(err.task_index(), Some(0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_refused_thread_over_slice_leaves_data_untouched() {
        let mut data = vec![0u8; 16];
        let desc = partition(16, 2, 1).unwrap();

        let err = run_slice_sized(
            &mut data,
            &desc.shards,
            Some(UNMAPPABLE_STACK),
            |_| (),
            |_, chunk, ()| {
                chunk.fill(1);
                Ok::<_, Infallible>(())
            },
        )
        .unwrap_err();

        assert!(matches!(err, HarnessError::Spawn { index: 0, .. }));
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_split_disjoint_with_gaps() {
        let mut data: Vec<u32> = (0..10).collect();
        let shards = [Shard::new(1, 3), Shard::new(3, 3), Shard::new(6, 9)];
        let chunks = split_disjoint(&mut data, &shards);

        assert_eq!(chunks.len(), 3);
        assert_eq!(&*chunks[0], &[1, 2]);
        assert!(chunks[1].is_empty());
        assert_eq!(&*chunks[2], &[6, 7, 8]);
    }

    #[test]
    fn test_run_serial() {
        let mut data = vec![0u16; 12];
        let batch = run_serial(&mut data, |_| 7u16, |shard, chunk, seed| {
            chunk.fill(seed);
            Ok::<_, Infallible>(shard.len())
        })
        .unwrap();

        assert_eq!(batch.outcomes(), &[12]);
        assert!(data.iter().all(|&v| v == 7));

        let err = run_serial(&mut data, |_| (), |_, _, ()| Err::<(), _>("nope"))
            .unwrap_err();
        assert_eq!(err.task_index(), Some(0));
    }

    #[test]
    fn test_batch_result_map() {
        let desc = partition(6, 3, 1).unwrap();
        let batch = run(&desc.shards, |_| 0u64, count).unwrap();
        let elapsed = batch.elapsed();
        let doubled = batch.map(|v| v * 2);

        assert_eq!(doubled.elapsed(), elapsed);
        assert_eq!(doubled.into_outcomes(), vec![4, 4, 4]);
    }
}
