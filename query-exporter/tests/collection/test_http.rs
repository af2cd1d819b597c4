use std::net::SocketAddr;
use std::sync::Arc;

use claims::*;
use hyper::{Client, StatusCode, Uri};
use pretty_assertions::assert_eq;
use query_exporter::engine::{http, mapper, Exporter};
use query_exporter::settings::HttpServerSettings;
use query_exporter::task::{ColumnValue, TaskSpec};
use serde_json::Value;

use crate::fixtures::{self, StubDataSource};

async fn get(address: SocketAddr, path: &str) -> (StatusCode, Option<String>, String) {
    let uri: Uri = assert_ok!(format!("http://{address}{path}").parse());
    let response = assert_ok!(Client::new().get(uri).await);
    let status = response.status();
    let content_type = response
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = assert_ok!(hyper::body::to_bytes(response.into_body()).await);
    (status, content_type, assert_ok!(String::from_utf8(body.to_vec())))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_endpoints() {
    once_cell::sync::Lazy::force(&query_exporter::logging::TEST_TRACING);
    let engine = assert_ok!(Exporter::builder("query-exporter")
        .with_data_source(Arc::new(StubDataSource::default()))
        .finish(vec![TaskSpec::new("SELECT v, l1 FROM stats")
            .with_context("http")
            .with_labels(["l1"])
            .with_metric("v", "value of v")
            .with_cron("0 0 1 1 *")]));

    let task = assert_some!(engine.tasks().get(0));
    task.set_response(fixtures::row(vec![
        ("v", ColumnValue::Integer(10)),
        ("l1", ColumnValue::Text("x".to_string())),
    ]));
    assert_ok!(mapper::collect_metrics(&task));

    let settings = HttpServerSettings { host: "127.0.0.1".to_string(), port: 0 };
    let (address, handle, tx_shutdown) =
        assert_ok!(http::run_http_server(engine.name(), engine.tx_service_api(), &settings));
    assert_ne!(address.port(), 0);

    let (status, _, body) = get(address, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, format!("query-exporter v{}", query_exporter::APP_VERSION));

    let (status, content_type, body) = get(address, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(assert_some!(content_type).starts_with("text/plain"));
    assert!(body.contains("# HELP http_v value of v"));
    assert!(body.contains(r#"http_v{l1="x"} 10"#));
    assert!(body.contains("query_exporter_app_info"));

    let (status, _, body) = get(address, "/tasks").await;
    assert_eq!(status, StatusCode::OK);
    let tasks: Value = assert_ok!(serde_json::from_str(&body));
    let tasks = assert_some!(tasks.as_array());
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["context"], "http");
    assert_eq!(tasks[0]["job"]["name"], "http_0");
    assert_eq!(tasks[0]["metrics"][0]["name"], "http_v");
    assert_eq!(tasks[0]["response"]["l1"], "x");

    let (status, _, _) = get(address, "/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_ok!(http::shutdown_http_server(tx_shutdown));
    assert_ok!(assert_ok!(handle.await));
    assert_ok!(engine.shutdown().await);
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let engine = assert_ok!(Exporter::builder("query-exporter")
        .with_data_source(Arc::new(StubDataSource::default()))
        .finish(Vec::new()));

    let settings = HttpServerSettings { host: "not a host".to_string(), port: 0 };
    assert_err!(http::run_http_server(engine.name(), engine.tx_service_api(), &settings));
    assert_ok!(engine.shutdown().await);
}
