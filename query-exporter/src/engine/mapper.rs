//! Applies a task's response row to its metric handles. No I/O happens here; the only side effect
//! is the update of counter and gauge series.

use crate::error::MappingError;
use crate::task::{Response, Task};

/// Maps the task's stored response onto its metrics. A task that has not run yet maps as if its
/// response were empty.
pub fn collect_metrics(task: &Task) -> Result<(), MappingError> {
    match task.response() {
        Some(response) => map_response(task, &response),
        None => map_response(task, &Response::default()),
    }
}

/// Updates every declared metric of `task` from `response`: gauges are set and counters are
/// incremented by the column of the same name (0.0 when absent or null), on the series bound to
/// the task's label columns. Metrics without a handle are skipped. The first failure stops the
/// mapping; metrics already updated keep their new values.
#[tracing::instrument(level = "debug", skip(task, response), fields(context=%task.context()))]
pub fn map_response(task: &Task, response: &Response) -> Result<(), MappingError> {
    let label_values = response.label_values(task.labels());
    let label_values: Vec<&str> = label_values.iter().map(String::as_str).collect();

    for name in task.metric_names() {
        let handle = match task.metric(name) {
            Some(handle) => handle,
            None => continue,
        };

        let value = response.metric_value(name)?;
        handle.update(&label_values, value)?;
    }

    Ok(())
}
