//! Metric handles derived from task declarations. Each declared metric becomes one labeled
//! counter or gauge family named `{context}_{name}` whose label schema is the task's labels.

use std::collections::HashMap;

use prometheus::core::Collector;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use serde::{Deserialize, Serialize};

use crate::error::{MappingError, TaskError};
use crate::task::TaskSpec;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
}

impl From<String> for MetricKind {
    fn from(rep: String) -> Self {
        Self::from(rep.as_str())
    }
}

impl From<&str> for MetricKind {
    /// Only the literal `counter` names a counter; everything else is a gauge.
    fn from(rep: &str) -> Self {
        if rep == "counter" {
            Self::Counter
        } else {
            Self::Gauge
        }
    }
}

#[derive(Debug, Clone)]
enum MetricSeries {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

/// Contract handed to the exposition side: everything that identifies a metric family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub description: String,
    pub kind: MetricKind,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MetricHandle {
    descriptor: MetricDescriptor,
    series: MetricSeries,
}

impl MetricHandle {
    pub fn new(
        name: impl Into<String>, description: impl Into<String>, kind: MetricKind, labels: &[String],
    ) -> Result<Self, prometheus::Error> {
        let descriptor = MetricDescriptor {
            name: name.into(),
            description: description.into(),
            kind,
            labels: labels.to_vec(),
        };

        let opts = Opts::new(descriptor.name.as_str(), descriptor.description.as_str());
        let label_names: Vec<&str> = labels.iter().map(String::as_str).collect();
        let series = match kind {
            MetricKind::Gauge => MetricSeries::Gauge(GaugeVec::new(opts, &label_names)?),
            MetricKind::Counter => MetricSeries::Counter(CounterVec::new(opts, &label_names)?),
        };

        // an unlabeled family has a single series, exposed at 0 before the first update
        if label_names.is_empty() {
            match &series {
                MetricSeries::Gauge(gauge) => {
                    gauge.get_metric_with_label_values(&[])?;
                },
                MetricSeries::Counter(counter) => {
                    counter.get_metric_with_label_values(&[])?;
                },
            }
        }

        Ok(Self { descriptor, series })
    }

    pub fn name(&self) -> &str {
        self.descriptor.name.as_str()
    }

    pub fn description(&self) -> &str {
        self.descriptor.description.as_str()
    }

    pub const fn kind(&self) -> MetricKind {
        self.descriptor.kind
    }

    pub fn labels(&self) -> &[String] {
        self.descriptor.labels.as_slice()
    }

    pub const fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn collector(&self) -> Box<dyn Collector> {
        match &self.series {
            MetricSeries::Gauge(gauge) => Box::new(gauge.clone()),
            MetricSeries::Counter(counter) => Box::new(counter.clone()),
        }
    }

    /// Applies `value` to the series bound to `label_values`, creating it on first use. Gauges
    /// are set to the value; counters are incremented by it.
    pub fn update(&self, label_values: &[&str], value: f64) -> Result<(), MappingError> {
        let series_error = |source| MappingError::Series { metric: self.descriptor.name.clone(), source };

        match &self.series {
            MetricSeries::Gauge(gauge) => {
                gauge
                    .get_metric_with_label_values(label_values)
                    .map_err(series_error)?
                    .set(value);
            },
            MetricSeries::Counter(counter) => {
                if !value.is_finite() {
                    return Err(MappingError::NonFiniteCounter { metric: self.descriptor.name.clone(), value });
                }

                if value < 0.0 {
                    return Err(MappingError::NegativeCounter { metric: self.descriptor.name.clone(), value });
                }

                counter
                    .get_metric_with_label_values(label_values)
                    .map_err(series_error)?
                    .inc_by(value);
            },
        }

        Ok(())
    }

    /// Current value of the series bound to `label_values`.
    pub fn value(&self, label_values: &[&str]) -> Result<f64, prometheus::Error> {
        match &self.series {
            MetricSeries::Gauge(gauge) => gauge.get_metric_with_label_values(label_values).map(|g| g.get()),
            MetricSeries::Counter(counter) => counter.get_metric_with_label_values(label_values).map(|c| c.get()),
        }
    }
}

/// Creates one handle per metric declared in the task's `metricsdesc`, keyed by the declared
/// (short) name.
#[tracing::instrument(level = "debug", skip(spec), fields(context=%spec.context))]
pub fn make_task_metrics(spec: &TaskSpec) -> Result<HashMap<String, MetricHandle>, TaskError> {
    let mut metrics = HashMap::with_capacity(spec.metricsdesc.len());
    for (name, description) in spec.metricsdesc.iter() {
        let full_name = format!("{}_{}", spec.context, name);
        let handle = MetricHandle::new(full_name.as_str(), description.as_str(), spec.metric_kind(name), &spec.labels)
            .map_err(|source| TaskError::Metric { name: full_name, source })?;
        metrics.insert(name.clone(), handle);
    }
    Ok(metrics)
}

/// Registers task metric families with the exposition registry. Full names must be unique across
/// all tasks.
pub fn register_task_metrics<'m>(
    registry: &Registry, metrics: impl IntoIterator<Item = &'m MetricHandle>,
) -> Result<(), TaskError> {
    for handle in metrics {
        registry.register(handle.collector()).map_err(|err| match err {
            prometheus::Error::AlreadyReg => TaskError::DuplicateMetric(handle.name().to_string()),
            source => TaskError::Metric { name: handle.name().to_string(), source },
        })?;
    }
    Ok(())
}
