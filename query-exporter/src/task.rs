//! Tasks are the unit of collection: one query, the metrics derived from its first result row and
//! the trigger that governs when the query runs. Tasks are declared in a TOML document under
//! repeated `[[metric]]` tables and are identified by the index they receive at load time.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};

use crate::catalog::{MetricHandle, MetricKind};
use crate::error::SchedulerError;
use crate::scheduler::TriggerSpec;

mod loader;
mod registry;
mod response;

pub use loader::{parse_tasks, read_tasks};
pub use registry::TaskRegistry;
pub use response::{ColumnValue, Response, NULL_LABEL};

pub type TaskIndex = usize;

pub const DEFAULT_CONTEXT: &str = "task";
pub const DEFAULT_TRIGGER_INTERVAL: Duration = Duration::from_secs(30);

fn default_context() -> String {
    DEFAULT_CONTEXT.to_string()
}

/// Declared form of a task as read from the task source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Prefix of every metric name declared by the task.
    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    pub request: String,

    /// Metric name to description; the keys define the task's metric set in declared order.
    pub metricsdesc: LinkedHashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metricstype: HashMap<String, MetricKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Period in seconds; ignored when `cron` is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

impl TaskSpec {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            context: default_context(),
            labels: Vec::default(),
            request: request.into(),
            metricsdesc: LinkedHashMap::default(),
            metricstype: HashMap::default(),
            cron: None,
            interval: None,
        }
    }

    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self { context: context.into(), ..self }
    }

    pub fn with_labels<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { labels: labels.into_iter().map(Into::into).collect(), ..self }
    }

    pub fn with_metric(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.metricsdesc.insert(name.into(), description.into());
        self
    }

    pub fn with_metric_kind(mut self, name: impl Into<String>, kind: MetricKind) -> Self {
        self.metricstype.insert(name.into(), kind);
        self
    }

    pub fn with_cron(self, expression: impl Into<String>) -> Self {
        Self { cron: Some(expression.into()), ..self }
    }

    pub fn with_interval(self, secs: u64) -> Self {
        Self { interval: Some(secs), ..self }
    }

    /// Metrics not listed in `metricstype` are gauges.
    pub fn metric_kind(&self, name: &str) -> MetricKind {
        self.metricstype.get(name).copied().unwrap_or_default()
    }

    pub fn trigger(&self) -> Result<TriggerSpec, SchedulerError> {
        match &self.cron {
            Some(expression) => TriggerSpec::cron(expression),
            None => {
                let interval = self
                    .interval
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_TRIGGER_INTERVAL);
                TriggerSpec::interval(interval)
            },
        }
    }
}

/// A loaded task. The metric handles are created once, before the task is scheduled, and never
/// change afterward; only the response is replaced on each execution.
pub struct Task {
    index: TaskIndex,
    spec: TaskSpec,
    trigger: TriggerSpec,
    metrics: HashMap<String, MetricHandle>,
    response: RwLock<Option<Arc<Response>>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("index", &self.index)
            .field("context", &self.spec.context)
            .field("labels", &self.spec.labels)
            .field("trigger", &self.trigger)
            .field("metrics", &self.metrics.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Task {
    pub fn new(
        index: TaskIndex, spec: TaskSpec, trigger: TriggerSpec, metrics: HashMap<String, MetricHandle>,
    ) -> Self {
        Self {
            index,
            spec,
            trigger,
            metrics,
            response: RwLock::new(None),
        }
    }

    pub const fn index(&self) -> TaskIndex {
        self.index
    }

    pub fn context(&self) -> &str {
        self.spec.context.as_str()
    }

    pub fn labels(&self) -> &[String] {
        self.spec.labels.as_slice()
    }

    pub fn request(&self) -> &str {
        self.spec.request.as_str()
    }

    pub const fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub const fn trigger(&self) -> &TriggerSpec {
        &self.trigger
    }

    /// Declared metric names, in declaration order.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.spec.metricsdesc.keys().map(String::as_str)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricHandle> {
        self.metrics.get(name)
    }

    pub const fn metrics(&self) -> &HashMap<String, MetricHandle> {
        &self.metrics
    }

    pub fn job_id(&self) -> String {
        self.index.to_string()
    }

    pub fn job_name(&self) -> String {
        format!("{}_{}", self.spec.context, self.index)
    }

    /// The most recent query result, if the task has run.
    pub fn response(&self) -> Option<Arc<Response>> {
        self.response.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the stored response with the result of the latest execution.
    pub fn set_response(&self, response: Response) -> Arc<Response> {
        let response = Arc::new(response);
        let mut current = self.response.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(Arc::clone(&response));
        response
    }
}
