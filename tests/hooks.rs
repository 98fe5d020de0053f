//! tests/hooks.rs
//! Tracer and logger integration.

mod common;

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;

use crate::common::{
  next_trace_call, setup_tracing, wait_until, ChannelTracer, LoggedEvent, RecordingLogger,
  TraceCall,
};

use jobkeeper::{
  ActionError, ExecutionContext, ExecutionError, ExecutionEvent, Job, JobManager, Logger,
  Schedule, Task, TraceFinisher, Tracer,
};

#[tokio::test]
async fn test_manager_tracer() {
  setup_tracing();
  let (tracer, mut calls) = ChannelTracer::new();
  let manager = JobManager::builder().tracer(tracer).build().unwrap();

  assert!(manager
    .run_task(Task::with_name("test_task", |_token| async { Ok(()) }))
    .is_accepted());

  assert_eq!(
    next_trace_call(&mut calls).await,
    TraceCall::Start("test_task".to_string())
  );
  assert_eq!(
    next_trace_call(&mut calls).await,
    TraceCall::Finish {
      name: "test_task".to_string(),
      error: None,
    }
  );

  // Finish is reported exactly once.
  manager.shutdown_graceful(Some(StdDuration::from_secs(1))).await.unwrap();
  assert!(calls.try_recv().is_err());
}

#[tokio::test]
async fn test_fires_error_on_task_error() {
  setup_tracing();
  let logger = RecordingLogger::default();
  let (tracer, mut calls) = ChannelTracer::new();
  let manager = JobManager::builder()
    .tracer(tracer)
    .logger(logger.clone())
    .build()
    .unwrap();

  assert!(manager
    .run_task(Task::with_name("failing", |_token| async {
      Err(ActionError::from("this is only a test"))
    }))
    .is_accepted());

  assert_eq!(
    next_trace_call(&mut calls).await,
    TraceCall::Start("failing".to_string())
  );
  assert_eq!(
    next_trace_call(&mut calls).await,
    TraceCall::Finish {
      name: "failing".to_string(),
      error: Some("this is only a test".to_string()),
    }
  );

  assert!(wait_until(StdDuration::from_secs(1), || !manager.is_running("failing")).await);
  assert_eq!(
    logger.failures(),
    vec![("failing".to_string(), "this is only a test".to_string())]
  );
  assert_eq!(manager.metrics_snapshot().executions_failed, 1);
}

#[tokio::test]
async fn test_job_error_recorded_in_details() -> anyhow::Result<()> {
  setup_tracing();
  let logger = RecordingLogger::default();
  let manager = JobManager::builder().logger(logger.clone()).build()?;

  manager.load_job(Job::new("flaky", Schedule::OnDemand, |_token| async {
    Err(ActionError::from(anyhow::anyhow!("disk full")))
  }))?;
  assert!(manager.run_job("flaky")?.is_accepted());

  assert!(wait_until(StdDuration::from_secs(1), || !manager.is_running("flaky")).await);
  let details = manager.job_details("flaky")?;
  assert_eq!(details.last_error.as_deref(), Some("disk full"));
  assert_eq!(details.run_count, 1);
  assert_eq!(
    logger.failures(),
    vec![("flaky".to_string(), "disk full".to_string())]
  );
  Ok(())
}

#[tokio::test]
async fn test_logger_event_sequence() {
  setup_tracing();
  let logger = RecordingLogger::default();
  let manager = JobManager::builder().logger(logger.clone()).build().unwrap();

  assert!(manager
    .run_task(Task::with_name("logged", |_token| async { Ok(()) }))
    .is_accepted());
  assert!(wait_until(StdDuration::from_secs(1), || !manager.is_running("logged")).await);

  assert_eq!(
    *logger.events.lock(),
    vec![
      LoggedEvent::Started("logged".to_string()),
      LoggedEvent::Completed("logged".to_string()),
    ]
  );
}

#[tokio::test]
async fn test_timeout_reaches_tracer() {
  setup_tracing();
  let (tracer, mut calls) = ChannelTracer::new();
  let manager = JobManager::builder().tracer(tracer).build().unwrap();

  let task = Task::with_name("too slow", |token: jobkeeper::CancellationToken| async move {
    token.cancelled().await;
    Ok(())
  })
  .with_timeout(StdDuration::from_millis(20));
  assert!(manager.run_task(task).is_accepted());

  assert_eq!(
    next_trace_call(&mut calls).await,
    TraceCall::Start("too slow".to_string())
  );
  match next_trace_call(&mut calls).await {
    TraceCall::Finish { name, error } => {
      assert_eq!(name, "too slow");
      let error = error.expect("Timeout should be reported to the tracer");
      assert!(error.contains("timed out"), "Unexpected error: {}", error);
    }
    other => panic!("Expected finish, got {:?}", other),
  }
}

struct PanickingLogger;

impl Logger for PanickingLogger {
  fn log(&self, event: &ExecutionEvent<'_>) {
    panic!("logger exploded on {}", event.context().name);
  }
}

#[tokio::test]
async fn test_panicking_logger_is_contained() {
  setup_tracing();
  let manager = JobManager::builder().logger(PanickingLogger).build().unwrap();

  assert!(manager
    .run_task(Task::with_name("unlucky", |_token| async { Ok(()) }))
    .is_accepted());
  assert!(wait_until(StdDuration::from_secs(1), || !manager.is_running("unlucky")).await);

  assert_eq!(manager.metrics_snapshot().executions_succeeded, 1);
}

struct PanickingTracer;

impl Tracer for PanickingTracer {
  fn start(&self, ctx: &ExecutionContext) -> Box<dyn TraceFinisher> {
    panic!("tracer exploded starting {}", ctx.name);
  }
}

#[tokio::test]
async fn test_panicking_tracer_start_still_runs_action() {
  setup_tracing();
  let logger = RecordingLogger::default();
  let manager = JobManager::builder()
    .tracer(PanickingTracer)
    .logger(logger.clone())
    .build()
    .unwrap();
  let runs = Arc::new(AtomicUsize::new(0));

  let runs_clone = runs.clone();
  assert!(manager
    .run_task(Task::with_name("untraced", move |_token| {
      let runs = runs_clone.clone();
      async move {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    }))
    .is_accepted());
  assert!(wait_until(StdDuration::from_secs(1), || !manager.is_running("untraced")).await);

  assert_eq!(runs.load(Ordering::SeqCst), 1, "Action must run despite the tracer");
  assert_eq!(manager.metrics_snapshot().executions_succeeded, 1);
  assert_eq!(
    *logger.events.lock(),
    vec![
      LoggedEvent::Started("untraced".to_string()),
      LoggedEvent::Completed("untraced".to_string()),
    ]
  );
}

struct FinishPanicTracer;

struct ExplodingFinisher;

impl Tracer for FinishPanicTracer {
  fn start(&self, _ctx: &ExecutionContext) -> Box<dyn TraceFinisher> {
    Box::new(ExplodingFinisher)
  }
}

impl TraceFinisher for ExplodingFinisher {
  fn finish(self: Box<Self>, ctx: &ExecutionContext, _error: Option<&ExecutionError>) {
    panic!("finisher exploded on {}", ctx.name);
  }
}

#[tokio::test]
async fn test_panicking_tracer_finish_still_records_completion() {
  setup_tracing();
  let manager = JobManager::builder()
    .tracer(FinishPanicTracer)
    .build()
    .unwrap();

  manager
    .load_job(Job::new("recorded", Schedule::OnDemand, |_token| async { Ok(()) }))
    .unwrap();
  assert!(manager.run_job("recorded").unwrap().is_accepted());
  assert!(wait_until(StdDuration::from_secs(1), || !manager.is_running("recorded")).await);

  let details = manager.job_details("recorded").unwrap();
  assert_eq!(details.run_count, 1);
  assert!(details.last_run.is_some());
  assert!(details.last_error.is_none());
}
