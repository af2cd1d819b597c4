use once_cell::sync::Lazy;
use prometheus::{IntGaugeVec, Opts, Registry};

use crate::engine::executor;
use crate::{scheduler, APP_VERSION};

pub(crate) static APP_INFO: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("query_exporter_app_info", "Application info"), &["version"])
        .expect("failed creating query_exporter_app_info metric")
});

/// Registers the exporter's own operational metrics alongside the task metrics.
#[tracing::instrument(level = "trace")]
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    APP_INFO.with_label_values(&[APP_VERSION]).set(1);
    registry.register(Box::new(APP_INFO.clone()))?;

    registry.register(Box::new(executor::QUERY_TIME.clone()))?;
    registry.register(Box::new(executor::COLLECTION_ERRORS.clone()))?;

    registry.register(Box::new(scheduler::SCHEDULER_MISFIRES.clone()))?;
    registry.register(Box::new(scheduler::SCHEDULER_JOBS.clone()))?;

    Ok(())
}
