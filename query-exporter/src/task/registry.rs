use std::sync::{Arc, PoisonError, RwLock};

use prometheus::Registry;

use super::{Task, TaskIndex, TaskSpec};
use crate::catalog;
use crate::error::TaskError;

/// Append-only store of loaded tasks, addressed by the index assigned at load time. Jobs and the
/// executor resolve tasks through the registry on every run rather than holding a task captured
/// at scheduling time.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<Vec<Arc<Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `specs` as tasks indexed contiguously from the current registry length. Each
    /// task's metric handles are created and registered with `metrics_registry` before the task
    /// becomes visible.
    #[tracing::instrument(level = "info", skip(self, specs, metrics_registry), fields(nr_specs=%specs.len()))]
    pub fn load(&self, specs: Vec<TaskSpec>, metrics_registry: &Registry) -> Result<Vec<Arc<Task>>, TaskError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let start = tasks.len();

        let mut loaded = Vec::with_capacity(specs.len());
        for (offset, spec) in specs.into_iter().enumerate() {
            let trigger = spec.trigger().map_err(|source| TaskError::InvalidTrigger {
                context: spec.context.clone(),
                source,
            })?;
            let metrics = catalog::make_task_metrics(&spec)?;
            loaded.push(Arc::new(Task::new(start + offset, spec, trigger, metrics)));
        }

        for task in loaded.iter() {
            catalog::register_task_metrics(metrics_registry, task.metrics().values())?;
            tracing::debug!(index=%task.index(), context=%task.context(), nr_metrics=%task.metrics().len(), "task metrics created");
        }

        tasks.extend(loaded.iter().cloned());
        Ok(loaded)
    }

    pub fn get(&self, index: TaskIndex) -> Option<Arc<Task>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).get(index).cloned()
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
