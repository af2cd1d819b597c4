use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use claims::*;
use pretty_assertions::assert_eq;
use prometheus::Registry;
use query_exporter::catalog::MetricKind;
use query_exporter::engine::{EngineCmd, Exporter};
use query_exporter::scheduler::{JobScheduler, TokioScheduler};
use query_exporter::task::{ColumnValue, TaskSpec};

use crate::fixtures::{self, StubDataSource};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interval_jobs_update_metrics() {
    once_cell::sync::Lazy::force(&query_exporter::logging::TEST_TRACING);
    let data_source = Arc::new(StubDataSource::new(vec![
        Some(fixtures::row(vec![
            ("V", ColumnValue::Integer(10)),
            ("L1", ColumnValue::Text("x".to_string())),
        ])),
        Some(fixtures::row(vec![
            ("v", ColumnValue::Integer(15)),
            ("l1", ColumnValue::Text("x".to_string())),
        ])),
    ]));

    let engine = assert_ok!(Exporter::builder("engine_test")
        .with_registry(Registry::new())
        .with_data_source(data_source.clone())
        .with_scheduler(Arc::new(TokioScheduler::new()))
        .finish(vec![TaskSpec::new("SELECT v, l1 FROM stats")
            .with_context("interval")
            .with_labels(["l1"])
            .with_metric("v", "value of v")
            .with_interval(1)]));

    assert_eq!(engine.jobs().len(), 1);
    assert_eq!(engine.scheduler().jobs()[0].name, "interval_0");

    let task = assert_some!(engine.tasks().get(0));
    let value = fixtures::wait_for_value(&task, "v", &["x"], 10.0, Duration::from_secs(5)).await;
    assert_relative_eq!(value, 10.0);
    let value = fixtures::wait_for_value(&task, "v", &["x"], 15.0, Duration::from_secs(5)).await;
    assert_relative_eq!(value, 15.0);

    let requests = data_source.requests();
    assert!(2 <= requests.len());
    assert!(requests.iter().all(|r| r == "SELECT v, l1 FROM stats"));

    let (cmd, rx) = EngineCmd::gather_metrics();
    assert_ok!(engine.tx_service_api().send(cmd));
    let report = assert_ok!(assert_ok!(rx.await));
    assert!(report.0.contains(r#"interval_v{l1="x"} 15"#));
    assert!(report.0.contains("query_exporter_query_time_seconds"));

    assert_ok!(engine.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_counter_accumulates_across_runs() {
    once_cell::sync::Lazy::force(&query_exporter::logging::TEST_TRACING);
    let data_source = Arc::new(StubDataSource::new(vec![
        Some(fixtures::row(vec![("v", ColumnValue::Integer(3))])),
        Some(fixtures::row(vec![("v", ColumnValue::Integer(4))])),
        None,
    ]));

    let engine = assert_ok!(Exporter::builder("engine_test")
        .with_data_source(data_source.clone())
        .finish(vec![TaskSpec::new("SELECT v FROM counts")
            .with_context("accumulate")
            .with_metric("v", "running total")
            .with_metric_kind("v", MetricKind::Counter)
            .with_interval(1)]));

    let task = assert_some!(engine.tasks().get(0));
    let value = fixtures::wait_for_value(&task, "v", &[], 7.0, Duration::from_secs(6)).await;
    assert_relative_eq!(value, 7.0);

    // an empty result adds nothing to a counter
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let value = assert_ok!(assert_some!(task.metric("v")).value(&[]));
    assert_relative_eq!(value, 7.0);

    assert_ok!(engine.shutdown().await);
}

#[tokio::test]
async fn test_task_snapshots_report_jobs() {
    let engine = assert_ok!(Exporter::builder("engine_test")
        .with_data_source(Arc::new(StubDataSource::default()))
        .finish(vec![
            TaskSpec::new("SELECT 1 AS a").with_context("snap_first").with_metric("a", "a"),
            TaskSpec::new("SELECT 2 AS b")
                .with_context("snap_second")
                .with_metric("b", "b")
                .with_cron("0 0 1 1 *"),
        ]));

    let (cmd, rx) = EngineCmd::report_on_tasks();
    assert_ok!(engine.tx_service_api().send(cmd));
    let snapshots = assert_ok!(assert_ok!(rx.await));

    assert_eq!(snapshots.len(), 2);
    let second = &snapshots[1];
    assert_eq!(second.index, 1);
    assert_eq!(second.context, "snap_second");
    let job = assert_some!(second.job.as_ref());
    assert_eq!(job.id, "1");
    assert_eq!(job.name, "snap_second_1");
    assert_eq!(second.metrics[0].name, "snap_second_b");
    assert_none!(second.response.as_ref());

    assert_ok!(engine.shutdown().await);
}
