//! tests/common.rs
//! Shared helper functions for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::future::BoxFuture;
use jobkeeper::{
  ActionResult, CancellationToken, ExecutionContext, ExecutionError, ExecutionEvent, JobManager,
  Logger, TraceFinisher, Tracer,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::TestWriter;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

pub fn build_manager() -> JobManager {
  JobManager::builder()
    .high_precision_heartbeat()
    .build()
    .expect("manager should build inside a runtime")
}

// Counts runs, then sleeps for `delay` or until cancelled.
pub fn counting_action(
  counter: Arc<AtomicUsize>,
  delay: StdDuration,
) -> impl Fn(CancellationToken) -> BoxFuture<'static, ActionResult> + Send + Sync + 'static {
  move |token: CancellationToken| -> BoxFuture<'static, ActionResult> {
    let counter = counter.clone();
    Box::pin(async move {
      let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(count, "Counting action executing");
      if delay > StdDuration::ZERO {
        tokio::select! {
          _ = token.cancelled() => {}
          _ = tokio::time::sleep(delay) => {}
        }
      }
      Ok(())
    })
  }
}

/// Polls `condition` every few milliseconds until it holds or `within` elapses.
pub async fn wait_until<F>(within: StdDuration, condition: F) -> bool
where
  F: Fn() -> bool,
{
  let deadline = tokio::time::Instant::now() + within;
  loop {
    if condition() {
      return true;
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(StdDuration::from_millis(2)).await;
  }
}

// --- Recording Logger ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedEvent {
  Started(String),
  Completed(String),
  Cancelled { name: String, timed_out: bool },
  Failed { name: String, message: String },
}

#[derive(Clone, Default)]
pub struct RecordingLogger {
  pub events: Arc<Mutex<Vec<LoggedEvent>>>,
}

impl RecordingLogger {
  pub fn failures(&self) -> Vec<(String, String)> {
    self
      .events
      .lock()
      .iter()
      .filter_map(|event| match event {
        LoggedEvent::Failed { name, message } => Some((name.clone(), message.clone())),
        _ => None,
      })
      .collect()
  }
}

impl Logger for RecordingLogger {
  fn log(&self, event: &ExecutionEvent<'_>) {
    let name = event.context().name.clone();
    let logged = match event {
      ExecutionEvent::Started { .. } => LoggedEvent::Started(name),
      ExecutionEvent::Completed { .. } => LoggedEvent::Completed(name),
      ExecutionEvent::Cancelled { timed_out, .. } => LoggedEvent::Cancelled {
        name,
        timed_out: *timed_out,
      },
      ExecutionEvent::Failed { error, .. } => LoggedEvent::Failed {
        name,
        message: error.to_string(),
      },
    };
    self.events.lock().push(logged);
  }
}

// --- Recording Tracer ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceCall {
  Start(String),
  Finish { name: String, error: Option<String> },
}

/// Forwards every start/finish call to a channel.
#[derive(Clone)]
pub struct ChannelTracer {
  tx: mpsc::UnboundedSender<TraceCall>,
}

impl ChannelTracer {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<TraceCall>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

impl Tracer for ChannelTracer {
  fn start(&self, ctx: &ExecutionContext) -> Box<dyn TraceFinisher> {
    let _ = self.tx.send(TraceCall::Start(ctx.name.clone()));
    Box::new(ChannelFinisher {
      tx: self.tx.clone(),
    })
  }
}

struct ChannelFinisher {
  tx: mpsc::UnboundedSender<TraceCall>,
}

impl TraceFinisher for ChannelFinisher {
  fn finish(self: Box<Self>, ctx: &ExecutionContext, error: Option<&ExecutionError>) {
    let _ = self.tx.send(TraceCall::Finish {
      name: ctx.name.clone(),
      error: error.map(ToString::to_string),
    });
  }
}

pub async fn next_trace_call(rx: &mut mpsc::UnboundedReceiver<TraceCall>) -> TraceCall {
  tokio::time::timeout(StdDuration::from_secs(2), rx.recv())
    .await
    .expect("timed out waiting for tracer call")
    .expect("tracer channel closed")
}
