//! demos/cancel_task.rs
//!
//! Demonstrates cooperative cancellation: a manual cancel, a timeout, and the
//! cancellation callback.

use std::time::Duration as StdDuration;
use tracing::{info, warn};
use jobkeeper::{CancellationToken, ExecutionEvent, JobManager, Logger, Task};

struct PrintLogger;

impl Logger for PrintLogger {
  fn log(&self, event: &ExecutionEvent<'_>) {
    match event {
      ExecutionEvent::Started { ctx } => info!("[{}] started", ctx.name),
      ExecutionEvent::Completed { ctx, elapsed } => {
        info!("[{}] completed in {:?}", ctx.name, elapsed)
      }
      ExecutionEvent::Cancelled {
        ctx,
        elapsed,
        timed_out,
      } => info!(
        "[{}] cancelled after {:?} (timed out: {})",
        ctx.name, elapsed, timed_out
      ),
      ExecutionEvent::Failed { ctx, error, .. } => warn!("[{}] failed: {}", ctx.name, error),
    }
  }
}

async fn wait_for_cancel(name: &'static str, token: CancellationToken) -> jobkeeper::ActionResult {
  info!("{} started, waiting for cancellation...", name);
  token.cancelled().await;
  info!("{} observed cancellation, cleaning up.", name);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let filter = tracing_subscriber::EnvFilter::try_new("warn,jobkeeper=debug,cancel_task=trace")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let manager = JobManager::builder().logger(PrintLogger).build()?;

  // --- Manual cancel ---
  let task = Task::with_name("taskToCancel", |token| wait_for_cancel("taskToCancel", token))
    .on_cancellation(|| info!("Cancellation callback fired for taskToCancel"));
  manager.run_task(task);
  tokio::time::sleep(StdDuration::from_millis(200)).await;
  let signalled = manager.cancel_task("taskToCancel")?;
  info!("Signalled {} execution(s).", signalled);

  // --- Timeout ---
  let task = Task::with_name("slowTask", |token| wait_for_cancel("slowTask", token))
    .with_timeout(StdDuration::from_millis(300))
    .on_cancellation(|| info!("Cancellation callback fired for slowTask"));
  manager.run_task(task);

  manager.shutdown_graceful(Some(StdDuration::from_secs(2))).await?;
  info!("Final metrics: {:#?}", manager.metrics_snapshot());
  Ok(())
}
