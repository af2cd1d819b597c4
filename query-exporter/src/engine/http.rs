use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::Extension;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing;
use axum::{BoxError, Json, Router};
use prometheus::TEXT_FORMAT;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::service::{EngineApiError, EngineCmd, EngineServiceApi, TaskSnapshot};
use crate::settings::HttpServerSettings;

struct State {
    name: String,
    tx_api: EngineServiceApi,
}

pub type TxExporterGracefulShutdown = oneshot::Sender<()>;
pub type ExporterJoinHandle = JoinHandle<Result<(), EngineApiError>>;

/// Binds the HTTP endpoint and serves it in the background until the returned shutdown sender
/// fires. The bound address is returned so a configured port of 0 can be resolved by the caller.
#[tracing::instrument(level = "trace", skip(name, tx_api))]
pub fn run_http_server(
    name: impl Into<String>, tx_api: EngineServiceApi, settings: &HttpServerSettings,
) -> Result<(SocketAddr, ExporterJoinHandle, TxExporterGracefulShutdown), EngineApiError> {
    let shared_state = Arc::new(State { name: name.into(), tx_api });

    let middleware_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_engine_error))
        .timeout(Duration::from_secs(10))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(shared_state))
        .into_inner();

    let app = Router::new()
        .route("/", routing::get(get_index))
        .route("/metrics", routing::get(get_metrics))
        .route("/tasks", routing::get(get_tasks))
        .layer(middleware_stack);

    let address = settings.address();
    let listener = TcpListener::bind(&address)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    tracing::info!("{:?} query exporter listening on {local_addr}", std::env::current_exe());

    let (tx_shutdown, rx_shutdown) = oneshot::channel::<()>();
    let handle: ExporterJoinHandle = tokio::spawn(async move {
        let server = axum::Server::from_tcp(listener)?.serve(app.into_make_service());
        let graceful = server.with_graceful_shutdown(async {
            rx_shutdown.await.ok();
        });
        graceful.await?;
        tracing::info!("{:?} query exporter HTTP server shutting down", std::env::current_exe());
        Ok(())
    });

    Ok((local_addr, handle, tx_shutdown))
}

#[tracing::instrument(level = "info", skip(tx))]
pub fn shutdown_http_server(tx: TxExporterGracefulShutdown) -> Result<(), EngineApiError> {
    if tx.send(()) == Err(()) {
        tracing::error!("failed to send shutdown signal to query exporter HTTP server");
        return Err(EngineApiError::GracefulShutdown);
    }

    Ok(())
}

#[tracing::instrument(level = "trace", skip(engine))]
async fn get_index(Extension(engine): Extension<Arc<State>>) -> String {
    format!("{} v{}", engine.name, crate::APP_VERSION)
}

#[tracing::instrument(level = "trace", skip(engine))]
async fn get_metrics(Extension(engine): Extension<Arc<State>>) -> Result<impl IntoResponse, EngineApiError> {
    let (cmd, rx) = EngineCmd::gather_metrics();
    engine.tx_api.send(cmd)?;
    let report = rx.await??;
    Ok(([(header::CONTENT_TYPE, TEXT_FORMAT)], report.0))
}

#[tracing::instrument(level = "trace", skip(engine))]
async fn get_tasks(Extension(engine): Extension<Arc<State>>) -> Result<Json<Vec<TaskSnapshot>>, EngineApiError> {
    let (cmd, rx) = EngineCmd::report_on_tasks();
    engine.tx_api.send(cmd)?;
    rx.await?.map(Json)
}

#[tracing::instrument(level = "trace", skip())]
async fn handle_engine_error(method: Method, uri: Uri, error: BoxError) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("`{method} {uri}` failed with {error}"),
    )
}
