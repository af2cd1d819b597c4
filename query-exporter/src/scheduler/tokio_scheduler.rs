use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{JobFn, JobHandle, JobScheduler, JobSpec, TriggerSpec, SCHEDULER_JOBS, SCHEDULER_MISFIRES};
use crate::error::SchedulerError;

struct ScheduledJob {
    handle: JobHandle,
    join: JoinHandle<()>,
}

/// Runs each job as its own task on the tokio runtime. Runs of a single job never overlap: the
/// next fire time is only considered once the current run completes.
#[derive(Default)]
pub struct TokioScheduler {
    jobs: DashMap<String, ScheduledJob>,
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("jobs", &self.jobs.iter().map(|j| j.key().clone()).collect::<Vec<_>>())
            .finish()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobScheduler for TokioScheduler {
    #[tracing::instrument(level = "info", skip(self, run), fields(job_id=%job.id, job_name=%job.name, trigger=%job.trigger))]
    fn schedule(&self, job: JobSpec, run: JobFn) -> Result<JobHandle, SchedulerError> {
        let runtime = Handle::try_current()?;
        let handle = JobHandle::from(&job);
        let id = job.id.clone();
        let join = runtime.spawn(run_job(job, run));

        if let Some(replaced) = self.jobs.insert(id, ScheduledJob { handle: handle.clone(), join }) {
            tracing::info!(replaced=?replaced.handle, "replacing previously scheduled job");
            replaced.join.abort();
        }

        SCHEDULER_JOBS.set(self.jobs.len() as i64);
        Ok(handle)
    }

    #[tracing::instrument(level = "info", skip(self))]
    fn remove(&self, id: &str) -> bool {
        let removed = self.jobs.remove(id).map(|(_, job)| job.join.abort()).is_some();
        SCHEDULER_JOBS.set(self.jobs.len() as i64);
        removed
    }

    fn jobs(&self) -> Vec<JobHandle> {
        let mut jobs: Vec<JobHandle> = self.jobs.iter().map(|j| j.handle.clone()).collect();
        jobs.sort_by(|lhs, rhs| lhs.id.cmp(&rhs.id));
        jobs
    }

    #[tracing::instrument(level = "info", skip(self))]
    fn shutdown(&self) {
        let nr_jobs = self.jobs.len();
        self.jobs.iter().for_each(|job| job.join.abort());
        self.jobs.clear();
        SCHEDULER_JOBS.set(0);
        tracing::info!(%nr_jobs, "scheduler shut down");
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.jobs.iter().for_each(|job| job.join.abort());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Firing {
    Run,
    Misfire { lateness: Duration },
}

fn assess_firing(scheduled: &DateTime<Utc>, now: &DateTime<Utc>, misfire_grace: Duration) -> Firing {
    match (*now - *scheduled).to_std() {
        Ok(lateness) if misfire_grace < lateness => Firing::Misfire { lateness },
        _ => Firing::Run,
    }
}

/// Collapses the fire times that passed while the job was busy into the latest one due at `now`,
/// returning it with the number of fire times skipped.
fn coalesce_due(trigger: &TriggerSpec, scheduled: DateTime<Utc>, now: &DateTime<Utc>) -> (DateTime<Utc>, usize) {
    let mut due = scheduled;
    let mut nr_skipped = 0;
    while let Some(next) = trigger.next_fire(&due).filter(|next| next <= now) {
        due = next;
        nr_skipped += 1;
    }
    (due, nr_skipped)
}

async fn run_job(job: JobSpec, run: JobFn) {
    let mut previous = Utc::now();
    loop {
        let scheduled = match job.trigger.next_fire(&previous) {
            Some(scheduled) => scheduled,
            None => {
                tracing::info!(job_name=%job.name, trigger=%job.trigger, "trigger has no further fire times");
                break;
            },
        };

        if let Ok(delay) = (scheduled - Utc::now()).to_std() {
            tokio::time::sleep(delay).await;
        }

        let now = Utc::now();
        let (scheduled, nr_skipped) = coalesce_due(&job.trigger, scheduled, &now);
        if 0 < nr_skipped {
            tracing::debug!(job_name=%job.name, %scheduled, %nr_skipped, "coalesced missed job runs");
        }

        match assess_firing(&scheduled, &now, job.misfire_grace) {
            Firing::Run => {
                tracing::debug!(job_name=%job.name, %scheduled, "running job");
                run_once(&job, &run).await;
                previous = scheduled;
            },
            Firing::Misfire { lateness } => {
                tracing::warn!(
                    job_name=%job.name, %scheduled, ?lateness, misfire_grace=?job.misfire_grace,
                    "job run missed by more than misfire grace time - skipping"
                );
                SCHEDULER_MISFIRES.with_label_values(&[job.name.as_str()]).inc();
                previous = now;
            },
        }
    }
}

async fn run_once(job: &JobSpec, run: &JobFn) {
    match AssertUnwindSafe(run()).catch_unwind().await {
        Ok(Ok(())) => {},
        Ok(Err(err)) => tracing::error!(error=?err, job_name=%job.name, "job run failed"),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|reason| reason.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::error!(job_name=%job.name, %reason, "job run panicked");
        },
    }
}
