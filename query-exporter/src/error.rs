use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use either::{Either, Left, Right};
use thiserror::Error;

use crate::task::TaskIndex;

pub type SharedString = Cow<'static, str>;

/// Names an error for the `error_type` label of the error counter. Errors nest by pointing at
/// their inner error until a leaf label is reached; the full label joins the path with `::`.
pub trait MetricLabel {
    fn slug(&self) -> SharedString;

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>>;

    fn label(&self) -> SharedString {
        match self.next() {
            Left(leaf) => format!("{}::{}", self.slug(), leaf).into(),
            Right(inner) => format!("{}::{}", self.slug(), inner.label()).into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to read task source {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse task source: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid trigger for task {context}: {source}")]
    InvalidTrigger {
        context: String,
        #[source]
        source: SchedulerError,
    },

    #[error("failed to create metric {name}: {source}")]
    Metric {
        name: String,
        #[source]
        source: prometheus::Error,
    },

    #[error("metric {0} is already registered by another task")]
    DuplicateMetric(String),
}

impl MetricLabel for TaskError {
    fn slug(&self) -> SharedString {
        "task".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::Io { .. } => Left("io".into()),
            Self::Parse(_) => Left("parse".into()),
            Self::InvalidTrigger { source, .. } => Right(Box::new(source)),
            Self::Metric { .. } => Left("metric".into()),
            Self::DuplicateMetric(_) => Left("duplicate".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("failed to connect to data source: {0}")]
    Connection(#[source] sea_orm::DbErr),

    #[error("query failed: {0}")]
    Query(#[from] sea_orm::DbErr),

    #[error("failed to decode column {column}: {source}")]
    Column {
        column: String,
        #[source]
        source: sea_orm::DbErr,
    },
}

impl MetricLabel for DataSourceError {
    fn slug(&self) -> SharedString {
        "datasource".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::Connection(_) => Left("connection".into()),
            Self::Query(_) => Left("query".into()),
            Self::Column { .. } => Left("column".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("column {column} holds {value:?}, which is not a number")]
    NotNumeric { column: String, value: String },

    #[error("counter {metric} cannot be incremented by negative value {value}")]
    NegativeCounter { metric: String, value: f64 },

    #[error("counter {metric} cannot be incremented by non-finite value {value}")]
    NonFiniteCounter { metric: String, value: f64 },

    #[error("failed to bind series of {metric}: {source}")]
    Series {
        metric: String,
        #[source]
        source: prometheus::Error,
    },
}

impl MetricLabel for MappingError {
    fn slug(&self) -> SharedString {
        "mapping".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::NotNumeric { .. } => Left("not_numeric".into()),
            Self::NegativeCounter { .. } => Left("negative_counter".into()),
            Self::NonFiniteCounter { .. } => Left("non_finite_counter".into()),
            Self::Series { .. } => Left("series".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("interval must be positive but was {0:?}")]
    InvalidInterval(Duration),

    #[error("jobs can only be scheduled from within a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl MetricLabel for SchedulerError {
    fn slug(&self) -> SharedString {
        "scheduler".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::InvalidCron { .. } => Left("cron".into()),
            Self::InvalidInterval(_) => Left("interval".into()),
            Self::NoRuntime(_) => Left("runtime".into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no task registered at index {0}")]
    UnknownTask(TaskIndex),

    #[error("{0}")]
    DataSource(#[from] DataSourceError),

    #[error("{0}")]
    Mapping(#[from] MappingError),
}

impl MetricLabel for ExecutionError {
    fn slug(&self) -> SharedString {
        "execution".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::UnknownTask(_) => Left("unknown_task".into()),
            Self::DataSource(err) => Right(Box::new(err)),
            Self::Mapping(err) => Right(Box::new(err)),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Config(#[from] config::ConfigError),

    #[error("environment variable {variable} has invalid value {value:?}")]
    InvalidEnvironment { variable: String, value: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("exporter engine requires a {0} before it can start")]
    MissingComponent(&'static str),

    #[error("{0}")]
    Task(#[from] TaskError),

    #[error("{0}")]
    Scheduler(#[from] SchedulerError),

    #[error("failure in prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
}
