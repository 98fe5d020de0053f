//! JobKeeper: an in-process job manager for Tokio.
//!
//! Loads named recurring jobs, polls a heartbeat to find the ones that are
//! due, and runs each execution on its own Tokio task under a per-name
//! concurrency policy. Ad-hoc tasks share the same execution path.
//!
//! # Features
//!
//! - Schedules: run immediately, every interval, on demand only, once at a
//!   fixed time, on weekday/time pairs (UTC), or through a custom
//!   [`NextRunProvider`].
//! - Serial (one in flight per name, extra invocations dropped) or parallel
//!   executions.
//! - Cooperative cancellation through a `CancellationToken`, with optional
//!   timeouts and a cancellation callback fired at most once.
//! - Panics inside actions are caught and reported; they never reach the
//!   heartbeat or the caller.
//! - Manual enable/disable plus a dynamic enabled predicate per job.
//! - Pluggable [`Tracer`] and [`Logger`] hooks, built-in metrics, and
//!   `tracing` diagnostics.
//! - Optional task-local [`ExecutionContext`] (`execution_context` feature,
//!   on by default).
//!
//! # Usage
//!
//! ```no_run
//! use jobkeeper::{Job, JobManager, Schedule, Task};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = JobManager::builder()
//!         .heartbeat_interval(Duration::from_millis(100))
//!         .build()?;
//!
//!     manager.load_job(
//!         Job::new("cleanup", Schedule::Every(Duration::from_secs(30)), |token| async move {
//!             tokio::select! {
//!                 _ = token.cancelled() => {}
//!                 _ = tokio::time::sleep(Duration::from_millis(10)) => {}
//!             }
//!             Ok(())
//!         })
//!         .with_timeout(Duration::from_secs(5)),
//!     )?;
//!     manager.start()?;
//!
//!     manager.run_task(Task::serial("reindex", |_token| async move {
//!         println!("reindexing");
//!         Ok(())
//!     }));
//!
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     manager.shutdown_graceful(Some(Duration::from_secs(10))).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Cancellation
//!
//! Timeouts and [`JobManager::cancel_task`] only cancel the execution's token.
//! An action that never checks the token runs to completion, past its
//! timeout, and keeps its execution record until it returns.

pub mod error;
pub(crate) mod heartbeat;
pub mod hooks;
pub mod job;
pub mod manager;
pub mod metrics;
pub(crate) mod registry;
pub mod schedule;
pub mod tracker;
pub(crate) mod worker;

// --- Public Re-exports ---

pub use manager::{
  JobManager, ManagerBuilder, DEFAULT_HEARTBEAT_INTERVAL, HIGH_PRECISION_HEARTBEAT_INTERVAL,
};

pub use error::{BuildError, ExecutionError, ManagerError, ShutdownError};

pub use job::context::ExecutionContext;
pub use job::{
  ActionError, ActionResult, Concurrency, ExecutionId, ExecutionKind, ExecutionStatus, Job,
  JobDetails, Task,
};
#[cfg(feature = "execution_context")]
pub use job::context::try_get_current_execution_context;

pub use hooks::{ExecutionEvent, Logger, TraceFinisher, Tracer};
pub use metrics::{ManagerMetrics, MetricsSnapshot};
pub use schedule::{NextRunProvider, Schedule};
pub use tracker::Admission;

pub use tokio_util::sync::CancellationToken;
