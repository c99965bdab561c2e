//! # Tool Hub Execution Core
//!
//! This crate is the process-execution engine of the tool hub. It runs
//! external command-line tools on behalf of callers, in two flavors:
//!
//! * **One-shot**: [`runner::run`] spawns a process, feeds it an optional
//!   input payload, captures stdout/stderr, and reports the exit code and
//!   wall-clock duration. A deadline kills the child and always wins over
//!   the child's own exit error.
//! * **Pooled streaming**: [`pool::WorkerPool`] keeps one persistent worker
//!   process alive per execution profile (working directory, shell,
//!   environment) and pipelines request/response pairs over its
//!   stdin/stdout using the length-prefixed [`frame`] protocol. Calls
//!   sharing a profile are strictly serialized by that worker's single
//!   loop; calls with different profiles run fully in parallel. Idle
//!   workers are evicted after a configurable window.
//!
//! Admission control for callers that need to bound concurrency per logical
//! group lives in the sibling `toolhub_fifo` crate.

pub mod config;
pub mod frame;
pub mod pool;
pub mod runner;
pub mod utils;

pub use config::{ConfigError, PoolConfig};
pub use pool::{PoolError, ProcessSpawner, WorkerConnection, WorkerInput, WorkerPool, WorkerSpawner};
pub use runner::{RunError, RunOptions, RunResult, StreamChild, StreamOptions, run, run_stream};
