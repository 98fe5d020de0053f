//! demos/simple_schedule.rs
//!
//! Loads a few scheduled jobs, lets the heartbeat drive them, then shuts down.

use chrono::{Datelike, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info};
use jobkeeper::{Job, JobManager, Schedule, Task};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,jobkeeper=info,simple_schedule=trace")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  // --- Build Manager ---
  let manager = JobManager::builder()
    .heartbeat_interval(StdDuration::from_millis(20))
    .build()?;

  // --- Define Jobs ---
  let ticks = Arc::new(AtomicUsize::new(0));
  let ticks_clone = ticks.clone();
  let every = Job::new(
    "every 200ms",
    Schedule::Every(StdDuration::from_millis(200)),
    move |_token| {
      let ticks = ticks_clone.clone();
      async move {
        let count = ticks.fetch_add(1, Ordering::Relaxed) + 1;
        info!("*** Interval job executing (Count: {}) ***", count);
        #[cfg(feature = "execution_context")]
        {
          let ctx = jobkeeper::execution_context!();
          info!("  Context: {} / execution {}", ctx.name, ctx.execution_id);
        }
        Ok(())
      }
    },
  );

  let once = Job::new(
    "one shot",
    Schedule::At(Utc::now() + ChronoDuration::milliseconds(500)),
    |_token| async {
      info!("*** One-shot job executing ***");
      Ok(())
    },
  );

  // Never fires during the demo; shows up in the job listing.
  let tomorrow = (Utc::now() + ChronoDuration::days(1)).weekday();
  let weekly = Job::new(
    "weekly report",
    Schedule::WeeklyAt(vec![(tomorrow, chrono::NaiveTime::MIN)]),
    |_token| async { Ok(()) },
  );

  manager.load_jobs([every, once, weekly])?;
  manager.start()?;

  // --- Ad-hoc Task ---
  manager.run_task(Task::serial("warmup", |_token| async {
    info!("*** Warmup task executing ***");
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    Ok(())
  }));

  tokio::time::sleep(StdDuration::from_secs(2)).await;

  for details in manager.list_jobs() {
    info!(
      "{}: runs={} last_run={:?} next_run={:?}",
      details.name, details.run_count, details.last_run, details.next_run
    );
  }
  info!("Metrics: {:#?}", manager.metrics_snapshot());

  // --- Shutdown ---
  match manager.shutdown_graceful(Some(StdDuration::from_secs(5))).await {
    Ok(()) => info!("Manager shut down successfully."),
    Err(e) => error!("Shutdown failed: {}", e),
  }
  Ok(())
}
