use std::path::Path;

use serde::Deserialize;

use super::TaskSpec;
use crate::error::TaskError;

#[derive(Debug, Default, Deserialize)]
struct TaskSource {
    #[serde(default)]
    metric: Vec<TaskSpec>,
}

/// Reads task declarations from the TOML document at `path`. A source that declares no tasks is
/// accepted with a warning.
#[tracing::instrument(level = "info")]
pub fn read_tasks(path: &Path) -> Result<Vec<TaskSpec>, TaskError> {
    let doc = std::fs::read_to_string(path).map_err(|source| TaskError::Io { path: path.to_path_buf(), source })?;
    let tasks = parse_tasks(&doc)?;
    if tasks.is_empty() {
        tracing::warn!(?path, "There are no metrics loaded from task source");
    } else {
        tracing::info!(?path, nr_tasks=%tasks.len(), "loaded tasks from task source");
    }
    Ok(tasks)
}

pub fn parse_tasks(doc: &str) -> Result<Vec<TaskSpec>, TaskError> {
    let source: TaskSource = toml::from_str(doc)?;
    Ok(source.metric)
}
