use std::future::Future;
use std::sync::Arc;

use clap::Parser;
use query_exporter::datasource::{DataSource, SqlDataSource};
use query_exporter::engine::{self, Exporter};
use query_exporter::settings::{CliOptions, Settings};
use query_exporter::{logging, task, Result, APP_NAME};

fn main() -> Result<()> {
    let subscriber = logging::get_subscriber(APP_NAME, logging::default_log_directives(), std::io::stdout);
    logging::init_subscriber(subscriber)?;

    let main_span = tracing::trace_span!("main");
    let _main_span_guard = main_span.enter();

    let options = CliOptions::parse();
    let settings = Settings::load(&options)?;
    let specs = task::read_tasks(&settings.collection.custom_metrics)?;

    start_pipeline(async move {
        let data_source = SqlDataSource::connect(&settings.database).await?;
        if let Err(err) = data_source.check().await {
            tracing::warn!(error=?err, "data source not reachable yet; queries will retry on their triggers");
        }

        let engine = Exporter::builder(APP_NAME)
            .with_data_source(Arc::new(data_source))
            .with_misfire_grace(settings.scheduler.misfire_grace)
            .finish(specs)?;

        tracing::info!("Starting query exporter HTTP server...");
        let (address, http_handle, tx_http_shutdown) =
            engine::http::run_http_server(engine.name(), engine.tx_service_api(), &settings.http)?;
        tracing::info!(%address, nr_jobs=%engine.jobs().len(), "query exporter fully running...");

        tokio::signal::ctrl_c().await?;
        tracing::info!("shutdown requested");

        engine::http::shutdown_http_server(tx_http_shutdown)?;
        http_handle.await??;
        engine.shutdown().await?;

        tracing::info!("query exporter stopped.");
        Ok(())
    })
}

#[tracing::instrument(level = "trace", skip(future), fields(worker_threads = num_cpus::get()))]
fn start_pipeline<F>(future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let worker_threads = num_cpus::get();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?
        .block_on(future)
}
