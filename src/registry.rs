use crate::error::ManagerError;
use crate::job::Job;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

/// Registration record for a loaded job.
#[derive(Debug)]
pub(crate) struct JobRecord {
  pub job: Arc<Job>,
  pub manually_disabled: bool,
  pub last_run: Option<DateTime<Utc>>,
  pub next_run: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
  pub run_count: u64,
}

/// The set of loaded jobs, keyed by name.
///
/// No user code (schedules, predicates, actions) runs while the lock is held;
/// callers compute next-run times before handing them in.
#[derive(Debug, Default)]
pub(crate) struct JobRegistry {
  jobs: Mutex<HashMap<String, JobRecord>>,
}

impl JobRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, job: Arc<Job>, next_run: Option<DateTime<Utc>>) -> Result<(), ManagerError> {
    let mut jobs = self.jobs.lock();
    if jobs.contains_key(&job.name) {
      return Err(ManagerError::DuplicateJob(job.name.clone()));
    }
    jobs.insert(
      job.name.clone(),
      JobRecord {
        job,
        manually_disabled: false,
        last_run: None,
        next_run,
        last_error: None,
        run_count: 0,
      },
    );
    Ok(())
  }

  pub fn remove(&self, name: &str) -> Result<Arc<Job>, ManagerError> {
    self
      .jobs
      .lock()
      .remove(name)
      .map(|record| record.job)
      .ok_or_else(|| ManagerError::JobNotFound(name.to_string()))
  }

  pub fn set_manually_disabled(&self, name: &str, disabled: bool) -> Result<(), ManagerError> {
    let mut jobs = self.jobs.lock();
    let record = jobs
      .get_mut(name)
      .ok_or_else(|| ManagerError::JobNotFound(name.to_string()))?;
    record.manually_disabled = disabled;
    Ok(())
  }

  /// Returns the job and its manual disabled flag.
  pub fn lookup(&self, name: &str) -> Result<(Arc<Job>, bool), ManagerError> {
    self
      .jobs
      .lock()
      .get(name)
      .map(|record| (record.job.clone(), record.manually_disabled))
      .ok_or_else(|| ManagerError::JobNotFound(name.to_string()))
  }

  /// Jobs whose stored next-run time is at or before `now` and which are not
  /// manually disabled. The enabled predicate is left to the caller.
  pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<Arc<Job>> {
    self
      .jobs
      .lock()
      .values()
      .filter(|record| !record.manually_disabled)
      .filter(|record| record.next_run.is_some_and(|next| next <= now))
      .map(|record| record.job.clone())
      .collect()
  }

  /// Stores a new next-run time, provided `job` is still the registered instance.
  pub fn set_next_run(&self, job: &Arc<Job>, next_run: Option<DateTime<Utc>>) {
    let mut jobs = self.jobs.lock();
    if let Some(record) = self.current_record(&mut jobs, job) {
      trace!(job_name = %job.name, ?next_run, "Next run updated.");
      record.next_run = next_run;
    }
  }

  pub fn record_completion(
    &self,
    job: &Arc<Job>,
    started_at: DateTime<Utc>,
    next_run: Option<DateTime<Utc>>,
    error: Option<String>,
  ) {
    let mut jobs = self.jobs.lock();
    if let Some(record) = self.current_record(&mut jobs, job) {
      record.last_run = Some(started_at);
      record.next_run = next_run;
      record.last_error = error;
      record.run_count += 1;
    } else {
      trace!(job_name = %job.name, "Job unloaded before its execution completed.");
    }
  }

  /// Snapshot of one record, for building `JobDetails`.
  pub fn with_record<R>(&self, name: &str, f: impl FnOnce(&JobRecord) -> R) -> Result<R, ManagerError> {
    self
      .jobs
      .lock()
      .get(name)
      .map(f)
      .ok_or_else(|| ManagerError::JobNotFound(name.to_string()))
  }

  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.jobs.lock().keys().cloned().collect();
    names.sort();
    names
  }

  pub fn len(&self) -> usize {
    self.jobs.lock().len()
  }

  // An unload followed by a reload under the same name must not receive
  // updates from executions of the old registration.
  fn current_record<'a>(
    &self,
    jobs: &'a mut HashMap<String, JobRecord>,
    job: &Arc<Job>,
  ) -> Option<&'a mut JobRecord> {
    jobs
      .get_mut(&job.name)
      .filter(|record| Arc::ptr_eq(&record.job, job))
  }
}
