//! Shardjoin: partitioned fork-join execution
//!
//! This crate splits a bounded, indexable resource into contiguous,
//! cache-aligned shards, runs one worker per shard with private state, and
//! joins and times the batch. Workers share nothing mutable except the
//! optional output channel in [`report`].

pub mod config;
pub mod error;
pub mod exec;
pub mod harness;
pub mod report;
pub mod shards;

// Re-export main types at crate root
pub use config::{default_workers, HarnessConfig, CACHE_LINE_BYTES, FALLBACK_WORKERS};
pub use error::{HarnessError, TaskFailure};
pub use exec::{run, run_serial, run_slice, BatchResult};
pub use harness::Harness;
pub use report::{ReportDiagnostics, ReportError, SyncReporter};
pub use shards::{partition, validate_shards, Shard, ShardDescriptor, ShardError, ShardIterator};
