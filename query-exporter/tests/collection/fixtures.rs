use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use query_exporter::datasource::DataSource;
use query_exporter::error::DataSourceError;
use query_exporter::task::{ColumnValue, Response, Task};

/// Serves queued rows in order, then repeats the last one.
#[derive(Debug, Default)]
pub struct StubDataSource {
    rows: Mutex<VecDeque<Option<Response>>>,
    last: Mutex<Option<Response>>,
    requests: Mutex<Vec<String>>,
}

impl StubDataSource {
    pub fn new(rows: impl IntoIterator<Item = Option<Response>>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for StubDataSource {
    async fn check(&self) -> Result<(), DataSourceError> {
        Ok(())
    }

    async fn fetch_first_row(&self, request: &str) -> Result<Option<Response>, DataSourceError> {
        self.requests.lock().unwrap().push(request.to_string());
        let mut last = self.last.lock().unwrap();
        if let Some(row) = self.rows.lock().unwrap().pop_front() {
            *last = row;
        }
        Ok(last.clone())
    }
}

pub fn row(columns: Vec<(&str, ColumnValue)>) -> Response {
    Response::from_columns(columns.into_iter().map(|(name, value)| (name.to_string(), value)))
}

/// Polls `metric` of `task` until it reads `expected` or `timeout` elapses, returning the last value.
pub async fn wait_for_value(task: &Task, metric: &str, labels: &[&str], expected: f64, timeout: Duration) -> f64 {
    let handle = task.metric(metric).expect("metric declared by task");
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let value = handle.value(labels).expect("label cardinality matches");
        if (value - expected).abs() < f64::EPSILON || deadline <= tokio::time::Instant::now() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
