use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts};

use super::mapper;
use crate::datasource::DataSource;
use crate::error::{ExecutionError, MetricLabel};
use crate::task::{Response, TaskIndex, TaskRegistry};

pub(crate) static QUERY_TIME: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "query_exporter_query_time_seconds",
            "Time spent running a task's query against the data source in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["task"],
    )
    .expect("failed creating query_exporter_query_time_seconds metric")
});

#[inline]
fn start_query_timer(task: &str) -> HistogramTimer {
    QUERY_TIME.with_label_values(&[task]).start_timer()
}

pub(crate) static COLLECTION_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("query_exporter_errors", "Number of failed task runs"),
        &["task", "error_type"],
    )
    .expect("failed creating query_exporter_errors metric")
});

#[inline]
pub(crate) fn track_result<T>(task: &str, result: Result<T, ExecutionError>) -> Result<T, ExecutionError> {
    if let Err(ref err) = result {
        tracing::error!(error=?err, %task, "task run failed");
        track_collection_errors(task, err);
    }

    result
}

#[inline]
pub(crate) fn track_collection_errors<E: MetricLabel>(task: &str, error: &E) {
    COLLECTION_ERRORS.with_label_values(&[task, error.label().as_ref()]).inc()
}

/// Runs a task's query and applies the resulting row to its metrics. The executor holds no task
/// itself; every run resolves the task from the registry by index.
#[derive(Clone)]
pub struct QueryExecutor {
    tasks: Arc<TaskRegistry>,
    data_source: Arc<dyn DataSource>,
}

impl fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("nr_tasks", &self.tasks.len())
            .field("data_source", &self.data_source)
            .finish()
    }
}

impl QueryExecutor {
    pub fn new(tasks: Arc<TaskRegistry>, data_source: Arc<dyn DataSource>) -> Self {
        Self { tasks, data_source }
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    /// Executes the task at `index`: fetches the first row of its query, stores it as the task's
    /// latest response (an empty response when the query returned no rows) and maps it onto the
    /// task's metrics. Failures are logged and counted under the task's context before being
    /// returned.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn execute(&self, index: TaskIndex) -> Result<Arc<Response>, ExecutionError> {
        let task = match self.tasks.get(index) {
            Some(task) => task,
            None => {
                let err = ExecutionError::UnknownTask(index);
                tracing::error!(error=?err, "task run failed");
                track_collection_errors("unknown", &err);
                return Err(err);
            },
        };

        tracing::info!("Request for {}", task.context());

        let result = async {
            let row = {
                let _timer = start_query_timer(task.context());
                self.data_source.fetch_first_row(task.request()).await?
            };

            if row.is_none() {
                tracing::debug!(context=%task.context(), "query returned no rows");
            }

            let response = task.set_response(row.unwrap_or_default());
            tracing::info!(context=%task.context(), ?response, "task response received");

            mapper::map_response(&task, &response)?;
            Ok::<_, ExecutionError>(response)
        }
        .await;

        track_result(task.context(), result)
    }
}
