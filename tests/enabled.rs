//! tests/enabled.rs
//! Manual disable/enable and the dynamic enabled predicate.

mod common;

use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;

use crate::common::{build_manager, counting_action, setup_tracing, wait_until};

use jobkeeper::{Admission, Job, ManagerError, Schedule};

#[tokio::test]
async fn test_disable_job() {
  setup_tracing();
  let manager = build_manager();
  let counter = Arc::new(AtomicUsize::new(0));

  manager
    .load_job(Job::new(
      "disabled",
      Schedule::Every(StdDuration::from_millis(10)),
      counting_action(counter.clone(), StdDuration::ZERO),
    ))
    .unwrap();
  manager.disable_job("disabled").unwrap();
  assert_eq!(manager.is_disabled("disabled"), Ok(true));
  assert!(manager.job_details("disabled").unwrap().disabled);
  manager.start().unwrap();

  tokio::time::sleep(StdDuration::from_millis(100)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 0, "Disabled job must not run");
  assert_eq!(manager.run_job("disabled"), Ok(Admission::Disabled));

  manager.enable_job("disabled").unwrap();
  assert_eq!(manager.is_disabled("disabled"), Ok(false));
  assert!(
    wait_until(StdDuration::from_secs(1), || counter.load(Ordering::SeqCst) >= 1).await,
    "Re-enabled job should run again"
  );

  manager.shutdown_graceful(Some(StdDuration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn test_enabled_provider() {
  setup_tracing();
  let manager = build_manager();
  let counter = Arc::new(AtomicUsize::new(0));
  let enabled = Arc::new(AtomicBool::new(false));

  let flag = enabled.clone();
  manager
    .load_job(
      Job::new(
        "gated",
        Schedule::Every(StdDuration::from_millis(10)),
        counting_action(counter.clone(), StdDuration::ZERO),
      )
      .with_enabled_provider(move || flag.load(Ordering::SeqCst)),
    )
    .unwrap();
  manager.start().unwrap();

  tokio::time::sleep(StdDuration::from_millis(100)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 0);
  assert_eq!(manager.is_disabled("gated"), Ok(true));
  assert_eq!(manager.run_job("gated"), Ok(Admission::Disabled));

  // Clearing the manual flag does not override the predicate.
  manager.enable_job("gated").unwrap();
  assert_eq!(manager.is_disabled("gated"), Ok(true));

  enabled.store(true, Ordering::SeqCst);
  assert_eq!(manager.is_disabled("gated"), Ok(false));
  assert!(wait_until(StdDuration::from_secs(1), || counter.load(Ordering::SeqCst) >= 1).await);

  manager.shutdown_graceful(Some(StdDuration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn test_manual_disable_overrides_enabled_provider() {
  setup_tracing();
  let manager = build_manager();

  manager
    .load_job(
      Job::new("gated", Schedule::OnDemand, |_token| async { Ok(()) })
        .with_enabled_provider(|| true),
    )
    .unwrap();
  assert_eq!(manager.is_disabled("gated"), Ok(false));

  manager.disable_job("gated").unwrap();
  assert_eq!(manager.is_disabled("gated"), Ok(true));
  assert_eq!(manager.run_job("gated"), Ok(Admission::Disabled));
}

#[tokio::test]
async fn test_panicking_provider_does_not_starve_other_jobs() {
  setup_tracing();
  let manager = build_manager();
  let counter = Arc::new(AtomicUsize::new(0));

  manager
    .load_jobs(vec![
      Job::new("broken", Schedule::Every(StdDuration::from_millis(10)), |_token| async {
        Ok(())
      })
      .with_enabled_provider(|| panic!("provider exploded")),
      Job::new(
        "healthy",
        Schedule::Every(StdDuration::from_millis(10)),
        counting_action(counter.clone(), StdDuration::ZERO),
      ),
    ])
    .unwrap();
  manager.start().unwrap();

  assert!(
    wait_until(StdDuration::from_secs(1), || counter.load(Ordering::SeqCst) >= 2).await,
    "Healthy job should keep running"
  );
  assert!(manager.is_started(), "Heartbeat should survive the panic");

  manager.shutdown_graceful(Some(StdDuration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn test_unknown_job_errors() {
  setup_tracing();
  let manager = build_manager();
  let not_found = || Err(ManagerError::JobNotFound("ghost".to_string()));

  assert_eq!(manager.disable_job("ghost"), not_found());
  assert_eq!(manager.enable_job("ghost"), not_found());
  assert_eq!(
    manager.is_disabled("ghost"),
    Err(ManagerError::JobNotFound("ghost".to_string()))
  );
  assert!(!manager.has_job("ghost"));
}
