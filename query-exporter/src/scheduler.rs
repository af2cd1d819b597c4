//! Periodic job execution. A job binds a trigger to a callback under a stable identifier; the
//! concrete engine behind [`JobScheduler`] decides how runs are dispatched.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, IntGauge, Opts};
use serde::Serialize;

use crate::error::SchedulerError;

mod tokio_scheduler;
mod trigger;

pub use tokio_scheduler::TokioScheduler;
pub use trigger::{CronExpr, TriggerSpec};

pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(60);

/// Callback invoked on every run of a job.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, crate::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    pub trigger: TriggerSpec,
    /// How late a run may start past its scheduled time before it is dropped.
    pub misfire_grace: Duration,
}

/// Identifies a registered job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub name: String,
    pub trigger: TriggerSpec,
}

impl From<&JobSpec> for JobHandle {
    fn from(spec: &JobSpec) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            trigger: spec.trigger.clone(),
        }
    }
}

pub trait JobScheduler: fmt::Debug + Send + Sync {
    /// Registers `run` under `job.id`. A job already registered under the same id is replaced.
    fn schedule(&self, job: JobSpec, run: JobFn) -> Result<JobHandle, SchedulerError>;

    fn remove(&self, id: &str) -> bool;

    fn jobs(&self) -> Vec<JobHandle>;

    fn shutdown(&self);
}

pub(crate) static SCHEDULER_MISFIRES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "query_exporter_misfires",
            "Number of job runs dropped because they started later than the misfire grace time",
        ),
        &["job"],
    )
    .expect("failed creating query_exporter_misfires metric")
});

pub(crate) static SCHEDULER_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("query_exporter_scheduled_jobs", "Number of jobs currently scheduled")
        .expect("failed creating query_exporter_scheduled_jobs metric")
});
