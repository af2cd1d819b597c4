pub mod executor;
pub mod http;
pub mod mapper;
mod service;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use prometheus::Registry;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub use executor::QueryExecutor;
pub use service::{EngineApiError, EngineCmd, EngineServiceApi, MetricsReport, TaskSnapshot};

use crate::datasource::DataSource;
use crate::error::{EngineError, SchedulerError, SharedString};
use crate::metrics;
use crate::scheduler::{JobFn, JobHandle, JobScheduler, JobSpec, TokioScheduler, DEFAULT_MISFIRE_GRACE};
use crate::task::{Task, TaskRegistry, TaskSpec};
use service::Service;

pub struct Exporter;
impl Exporter {
    pub fn builder(name: impl Into<SharedString>) -> ExporterEngine<Building> {
        ExporterEngine::default().with_name(name)
    }
}

#[derive(Debug)]
pub struct ExporterEngine<S: EngineState> {
    pub inner: S,
}

impl Default for ExporterEngine<Building> {
    fn default() -> Self {
        Self { inner: Building::default() }
    }
}

/// Represents exporter engine state.
pub trait EngineState {}

pub struct Building {
    name: SharedString,
    metrics_registry: Option<Registry>,
    data_source: Option<Arc<dyn DataSource>>,
    scheduler: Option<Arc<dyn JobScheduler>>,
    misfire_grace: Duration,
}
impl EngineState for Building {}

impl Default for Building {
    fn default() -> Self {
        Self {
            name: SharedString::default(),
            metrics_registry: None,
            data_source: None,
            scheduler: None,
            misfire_grace: DEFAULT_MISFIRE_GRACE,
        }
    }
}

impl fmt::Debug for Building {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Building")
            .field("name", &self.name)
            .field("data_source", &self.data_source)
            .field("scheduler", &self.scheduler)
            .field("misfire_grace", &self.misfire_grace)
            .finish()
    }
}

impl ExporterEngine<Building> {
    pub fn with_name(self, name: impl Into<SharedString>) -> Self {
        Self { inner: Building { name: name.into(), ..self.inner } }
    }

    pub fn with_registry(self, registry: Registry) -> Self {
        tracing::info!("added metrics registry to exporter engine.");
        Self {
            inner: Building { metrics_registry: Some(registry), ..self.inner },
        }
    }

    pub fn with_data_source(self, data_source: Arc<dyn DataSource>) -> Self {
        tracing::info!(?data_source, "setting data source on exporter engine builder.");
        Self {
            inner: Building { data_source: Some(data_source), ..self.inner },
        }
    }

    pub fn with_scheduler(self, scheduler: Arc<dyn JobScheduler>) -> Self {
        tracing::info!(?scheduler, "setting job scheduler on exporter engine builder.");
        Self {
            inner: Building { scheduler: Some(scheduler), ..self.inner },
        }
    }

    pub fn with_misfire_grace(self, misfire_grace: Duration) -> Self {
        Self { inner: Building { misfire_grace, ..self.inner } }
    }

    /// Loads `specs` as tasks, registers their metrics with the engine's registry and schedules
    /// one job per task. Must be called from within a tokio runtime.
    #[tracing::instrument(level = "info", skip(self, specs), fields(name=%self.inner.name, nr_specs=%specs.len()))]
    pub fn finish(self, specs: Vec<TaskSpec>) -> Result<ExporterEngine<Running>, EngineError> {
        let runtime = Handle::try_current().map_err(SchedulerError::from)?;
        let data_source = self.inner.data_source.ok_or(EngineError::MissingComponent("data source"))?;
        let metrics_registry = self.inner.metrics_registry.unwrap_or_default();
        let scheduler = self
            .inner
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new()));

        metrics::register_metrics(&metrics_registry)?;

        let tasks = Arc::new(TaskRegistry::new());
        let loaded = tasks.load(specs, &metrics_registry)?;
        if loaded.is_empty() {
            tracing::warn!("no tasks loaded; exporter runs without scheduled jobs");
        }

        let executor = QueryExecutor::new(tasks.clone(), data_source);
        let jobs = loaded
            .iter()
            .map(|task| schedule_task(scheduler.as_ref(), &executor, task, self.inner.misfire_grace))
            .collect::<Result<Vec<_>, _>>()?;

        let service = Service::new(metrics_registry.clone(), tasks.clone(), scheduler.clone());
        let tx_service_api = service.tx_api();
        let service_handle = runtime.spawn(service.run());

        Ok(ExporterEngine {
            inner: Running {
                name: self.inner.name,
                tx_service_api,
                service_handle,
                tasks,
                scheduler,
                jobs,
                metrics_registry,
            },
        })
    }
}

/// Registers the job running `task` on its trigger. The job captures only the task's index, so
/// every run resolves the task's current state through the executor's registry.
#[tracing::instrument(level = "debug", skip(scheduler, executor, task), fields(index=%task.index(), context=%task.context()))]
pub fn schedule_task(
    scheduler: &dyn JobScheduler, executor: &QueryExecutor, task: &Task, misfire_grace: Duration,
) -> Result<JobHandle, SchedulerError> {
    let index = task.index();
    let executor = executor.clone();
    let run: JobFn = Arc::new(move || {
        let executor = executor.clone();
        async move {
            executor.execute(index).await?;
            Ok::<(), anyhow::Error>(())
        }
        .boxed()
    });

    let job = JobSpec {
        id: task.job_id(),
        name: task.job_name(),
        trigger: task.trigger().clone(),
        misfire_grace,
    };

    let handle = scheduler.schedule(job, run)?;
    tracing::info!("job {} scheduled", handle.name);
    Ok(handle)
}

pub struct Running {
    name: SharedString,
    tx_service_api: EngineServiceApi,
    service_handle: JoinHandle<()>,
    tasks: Arc<TaskRegistry>,
    scheduler: Arc<dyn JobScheduler>,
    jobs: Vec<JobHandle>,
    metrics_registry: Registry,
}

impl EngineState for Running {}

impl fmt::Debug for Running {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Running")
            .field("name", &self.name)
            .field("nr_tasks", &self.tasks.len())
            .field("jobs", &self.jobs)
            .finish()
    }
}

impl ExporterEngine<Running> {
    pub fn name(&self) -> &str {
        self.inner.name.as_ref()
    }

    pub fn tx_service_api(&self) -> EngineServiceApi {
        self.inner.tx_service_api.clone()
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.inner.tasks
    }

    pub fn jobs(&self) -> &[JobHandle] {
        self.inner.jobs.as_slice()
    }

    pub fn scheduler(&self) -> &Arc<dyn JobScheduler> {
        &self.inner.scheduler
    }

    pub const fn metrics_registry(&self) -> &Registry {
        &self.inner.metrics_registry
    }

    /// Stops every scheduled job and waits for the engine service to drain. HTTP handlers still
    /// holding a service sender keep the service alive until they are dropped.
    #[tracing::instrument(level = "info", skip(self), fields(name=%self.inner.name))]
    pub async fn shutdown(self) -> crate::Result<()> {
        self.inner.scheduler.shutdown();
        drop(self.inner.tx_service_api);
        self.inner.service_handle.await?;
        tracing::info!("query exporter engine stopped");
        Ok(())
    }
}
