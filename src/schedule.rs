use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use tracing::warn;

/// A caller-supplied schedule.
///
/// Implementations must be pure: the same `last_run` must always produce the
/// same answer, and no state may be mutated. Returning `None` means the job
/// will not be run again automatically.
pub trait NextRunProvider: fmt::Debug + Send + Sync {
  fn next_run_time(&self, last_run: Option<DateTime<Utc>>) -> Option<DateTime<Utc>>;
}

/// Represents the different ways a job can be scheduled.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Schedule {
  /// Run once, as soon as the job is loaded, then never again.
  Immediately,
  /// Run repeatedly, `interval` after the last run. The first run is due at load.
  Every(StdDuration),
  /// Never due; the job only runs through `JobManager::run_job`.
  OnDemand,
  /// Run exactly once at the given time.
  At(DateTime<Utc>),
  /// Run at specific UTC times on given weekdays.
  WeeklyAt(Vec<(Weekday, NaiveTime)>),
  /// Delegate to an external provider.
  #[cfg_attr(feature = "serde", serde(skip))]
  Custom(Arc<dyn NextRunProvider>),
}

impl Schedule {
  /// Wraps an external provider.
  pub fn custom<P: NextRunProvider + 'static>(provider: P) -> Self {
    Schedule::Custom(Arc::new(provider))
  }

  /// Returns the next due time given the last run time, using `Utc::now()` as
  /// the current instant where a variant needs one.
  pub fn next_run_time(&self, last_run: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    self.next_run_time_at(last_run, Utc::now())
  }

  /// Same as [`Schedule::next_run_time`] with an explicit "now".
  pub fn next_run_time_at(
    &self,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> Option<DateTime<Utc>> {
    match self {
      Schedule::Immediately => match last_run {
        None => Some(now),
        Some(_) => None,
      },
      Schedule::Every(interval) => match last_run {
        None => Some(now),
        Some(last) => match ChronoDuration::from_std(*interval) {
          Ok(chrono_interval) => last.checked_add_signed(chrono_interval),
          Err(e) => {
            warn!("Failed to convert interval duration {:?}: {}", interval, e);
            None
          }
        },
      },
      Schedule::OnDemand => None,
      Schedule::At(run_at) => match last_run {
        // A run at or after the target time consumes it.
        Some(last) if last >= *run_at => None,
        _ => Some(*run_at),
      },
      Schedule::WeeklyAt(times) => next_weekday_time(times, last_run.unwrap_or(now)),
      Schedule::Custom(provider) => provider.next_run_time(last_run),
    }
  }
}

/// Earliest `(weekday, time)` pair strictly after `reference_time`.
fn next_weekday_time(
  weekday_times: &[(Weekday, NaiveTime)],
  reference_time: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
  let reference_day = reference_time.date_naive();
  let current = reference_time.weekday().num_days_from_sunday() as i64;

  weekday_times
    .iter()
    .map(|(weekday, time)| {
      let mut days_offset = (7 + weekday.num_days_from_sunday() as i64 - current) % 7;
      if days_offset == 0 && reference_time.time() >= *time {
        // Already passed today, so the same slot next week.
        days_offset = 7;
      }
      let day = reference_day + ChronoDuration::days(days_offset);
      DateTime::<Utc>::from_naive_utc_and_offset(day.and_time(*time), Utc)
    })
    .min()
}
