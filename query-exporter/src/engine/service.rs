use std::fmt;
use std::sync::Arc;

use prometheus::{Registry, TextEncoder};
use tokio::sync::mpsc;

pub use protocol::{EngineApiError, EngineCmd, EngineServiceApi, MetricsReport, TaskSnapshot};

use crate::scheduler::JobScheduler;
use crate::task::{Task, TaskRegistry};

mod protocol {
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response as HttpResponse};
    use serde::Serialize;
    use thiserror::Error;
    use tokio::sync::{mpsc, oneshot};

    use crate::catalog::MetricDescriptor;
    use crate::scheduler::{JobHandle, TriggerSpec};
    use crate::task::{Response, TaskIndex};

    pub type EngineServiceApi = mpsc::UnboundedSender<EngineCmd>;

    #[derive(Debug)]
    pub enum EngineCmd {
        GatherMetrics {
            tx: oneshot::Sender<Result<MetricsReport, EngineApiError>>,
        },
        ReportOnTasks {
            tx: oneshot::Sender<Result<Vec<TaskSnapshot>, EngineApiError>>,
        },
    }

    impl EngineCmd {
        #[inline]
        pub fn gather_metrics() -> (Self, oneshot::Receiver<Result<MetricsReport, EngineApiError>>) {
            let (tx, rx) = oneshot::channel();
            (Self::GatherMetrics { tx }, rx)
        }

        #[inline]
        pub fn report_on_tasks() -> (Self, oneshot::Receiver<Result<Vec<TaskSnapshot>, EngineApiError>>) {
            let (tx, rx) = oneshot::channel();
            (Self::ReportOnTasks { tx }, rx)
        }
    }

    /// Metrics rendered in the Prometheus text exposition format.
    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct MetricsReport(pub String);

    /// Point-in-time view of a loaded task, its job and its most recent response.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct TaskSnapshot {
        pub index: TaskIndex,
        pub context: String,
        pub trigger: TriggerSpec,
        pub job: Option<JobHandle>,
        pub metrics: Vec<MetricDescriptor>,
        pub response: Option<Response>,
    }

    /// Engine API failed to satisfy request.
    #[derive(Debug, Error)]
    pub enum EngineApiError {
        #[error("Failed to start exporter HTTP server: {0}")]
        Bootstrap(#[from] hyper::Error),

        #[error("Could not connect to exporter engine service: {0}")]
        EngineSend(#[from] mpsc::error::SendError<EngineCmd>),

        #[error("Failure in prometheus: {0}")]
        Prometheus(#[from] prometheus::Error),

        #[error("Could not receive response from exporter engine service: {0}")]
        Recv(#[from] oneshot::error::RecvError),

        #[error("Could not open or bind to a TCP address for the exporter's HTTP server: {0}")]
        IO(#[from] std::io::Error),

        #[error("Failed to signal graceful shutdown of the exporter HTTP server")]
        GracefulShutdown,
    }

    impl IntoResponse for EngineApiError {
        fn into_response(self) -> HttpResponse {
            tracing::error!(error=?self, "failure in exporter engine API");
            (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
        }
    }
}

/// Actor answering the HTTP endpoints from the engine's state. Requests arrive over
/// [`EngineServiceApi`] and the service stops once every sender is dropped.
pub struct Service {
    tx_api: EngineServiceApi,
    rx_api: mpsc::UnboundedReceiver<EngineCmd>,
    metrics_registry: Registry,
    tasks: Arc<TaskRegistry>,
    scheduler: Arc<dyn JobScheduler>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("nr_tasks", &self.tasks.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Service {
    pub fn new(metrics_registry: Registry, tasks: Arc<TaskRegistry>, scheduler: Arc<dyn JobScheduler>) -> Self {
        let (tx_api, rx_api) = mpsc::unbounded_channel();
        Self { tx_api, rx_api, metrics_registry, tasks, scheduler }
    }

    pub fn tx_api(&self) -> EngineServiceApi {
        self.tx_api.clone()
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run(self) {
        let Self { tx_api, mut rx_api, metrics_registry, tasks, scheduler } = self;

        // the loop ends once every handed-out sender is dropped
        drop(tx_api);

        while let Some(cmd) = rx_api.recv().await {
            match cmd {
                EngineCmd::GatherMetrics { tx } => {
                    let report = get_metrics_report(&metrics_registry);
                    if let Err(ref err) = report {
                        tracing::warn!(error=?err, "failed to gather metrics report");
                    }
                    let _ = tx.send(report);
                },

                EngineCmd::ReportOnTasks { tx } => {
                    let snapshots = get_task_snapshots(&tasks, scheduler.as_ref());
                    tracing::info!(nr_tasks=%snapshots.len(), "reporting on tasks");
                    let _ = tx.send(Ok(snapshots));
                },
            }
        }

        tracing::info!("query exporter engine service stopping...");
    }
}

fn get_task_snapshots(tasks: &TaskRegistry, scheduler: &dyn JobScheduler) -> Vec<TaskSnapshot> {
    let jobs = scheduler.jobs();
    tasks
        .tasks()
        .iter()
        .map(|task| {
            let job_id = task.job_id();
            let job = jobs.iter().find(|job| job.id == job_id).cloned();
            make_snapshot(task, job)
        })
        .collect()
}

#[tracing::instrument(level = "debug", skip(registry))]
fn get_metrics_report(registry: &Registry) -> Result<MetricsReport, EngineApiError> {
    let metrics = registry.gather();
    let encoder = TextEncoder::new();
    let report = encoder.encode_to_string(&metrics)?;
    Ok(MetricsReport(report))
}

fn make_snapshot(task: &Task, job: Option<crate::scheduler::JobHandle>) -> TaskSnapshot {
    let metrics = task
        .metric_names()
        .filter_map(|name| task.metric(name))
        .map(|handle| handle.descriptor().clone())
        .collect();

    TaskSnapshot {
        index: task.index(),
        context: task.context().to_string(),
        trigger: task.trigger().clone(),
        job,
        metrics,
        response: task.response().map(|response| response.as_ref().clone()),
    }
}
