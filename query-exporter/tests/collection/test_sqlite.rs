use std::sync::Arc;

use approx::assert_relative_eq;
use claims::*;
use pretty_assertions::assert_eq;
use prometheus::Registry;
use query_exporter::datasource::{DataSource, SqlDataSource};
use query_exporter::engine::QueryExecutor;
use query_exporter::settings::DatabaseSettings;
use query_exporter::task::{ColumnValue, TaskRegistry, TaskSpec};
use sea_orm::ConnectionTrait;
use secrecy::Secret;

async fn make_data_source() -> SqlDataSource {
    let settings = DatabaseSettings {
        url: Secret::new("sqlite::memory:".to_string()),
        max_connections: 1,
        min_connections: 1,
        connect_lazy: false,
        ..DatabaseSettings::default()
    };
    let data_source = assert_ok!(SqlDataSource::connect(&settings).await);
    assert_ok!(data_source.check().await);

    let connection = data_source.connection();
    assert_ok!(connection.execute_unprepared("CREATE TABLE stats (v INTEGER, l1 TEXT)").await);
    assert_ok!(connection.execute_unprepared("INSERT INTO stats (v, l1) VALUES (10, 'x')").await);
    data_source
}

#[tokio::test]
async fn test_first_row_is_lower_cased() {
    let data_source = make_data_source().await;
    let response = assert_some!(assert_ok!(data_source.fetch_first_row("SELECT v AS V, l1 AS L1 FROM stats").await));

    assert_eq!(response.len(), 2);
    assert_eq!(assert_some!(response.get("v")), &ColumnValue::Integer(10));
    assert_eq!(assert_some!(response.get("L1")), &ColumnValue::Text("x".to_string()));
}

#[tokio::test]
async fn test_aggregate_column_is_decoded() {
    let data_source = make_data_source().await;
    let response = assert_some!(assert_ok!(data_source.fetch_first_row("SELECT count(*) AS c FROM stats").await));

    assert_eq!(response.len(), 1);
    assert_eq!(assert_some!(response.get("c")), &ColumnValue::Integer(1));
}

#[tokio::test]
async fn test_expression_columns_are_decoded() {
    let data_source = make_data_source().await;
    let response = assert_some!(assert_ok!(
        data_source
            .fetch_first_row("SELECT 1 AS value_1, 2.5 AS value_2, 'First' AS label_1, NULL AS n")
            .await
    ));

    assert_eq!(response.len(), 4);
    assert_eq!(assert_some!(response.get("value_1")), &ColumnValue::Integer(1));
    assert_eq!(assert_some!(response.get("value_2")), &ColumnValue::Float(2.5));
    assert_eq!(assert_some!(response.get("label_1")), &ColumnValue::Text("First".to_string()));
    assert_eq!(assert_some!(response.get("n")), &ColumnValue::Null);
}

#[tokio::test]
async fn test_query_without_rows() {
    let data_source = make_data_source().await;
    let response = assert_ok!(data_source.fetch_first_row("SELECT v FROM stats WHERE v < 0").await);
    assert_none!(response);
}

#[tokio::test]
async fn test_invalid_query_fails() {
    let data_source = make_data_source().await;
    assert_err!(data_source.fetch_first_row("SELECT nothing FROM nowhere").await);
}

#[tokio::test]
async fn test_sqlite_gauge_follows_table() {
    once_cell::sync::Lazy::force(&query_exporter::logging::TEST_TRACING);
    let data_source = Arc::new(make_data_source().await);

    let registry = Registry::new();
    let tasks = Arc::new(TaskRegistry::new());
    assert_ok!(tasks.load(
        vec![TaskSpec::new("SELECT v, l1 FROM stats")
            .with_context("test")
            .with_labels(["l1"])
            .with_metric("v", "value of v")],
        &registry,
    ));
    let executor = QueryExecutor::new(tasks.clone(), data_source.clone());
    let task = assert_some!(tasks.get(0));
    let handle = assert_some!(task.metric("v"));

    assert_ok!(executor.execute(0).await);
    assert_relative_eq!(assert_ok!(handle.value(&["x"])), 10.0);

    assert_ok!(data_source.connection().execute_unprepared("UPDATE stats SET v = 15").await);
    assert_ok!(executor.execute(0).await);
    assert_relative_eq!(assert_ok!(handle.value(&["x"])), 15.0);

    let families = registry.gather();
    let family = assert_some!(families.iter().find(|f| f.get_name() == "test_v"));
    assert_eq!(family.get_metric().len(), 1);
}

#[tokio::test]
async fn test_sqlite_gauge_from_aggregate() {
    once_cell::sync::Lazy::force(&query_exporter::logging::TEST_TRACING);
    let data_source = Arc::new(make_data_source().await);

    let registry = Registry::new();
    let tasks = Arc::new(TaskRegistry::new());
    assert_ok!(tasks.load(
        vec![TaskSpec::new("SELECT count(*) AS c, sum(v) AS total FROM stats")
            .with_context("aggregate")
            .with_metric("c", "number of rows")
            .with_metric("total", "sum of v")],
        &registry,
    ));
    let executor = QueryExecutor::new(tasks.clone(), data_source.clone());
    let task = assert_some!(tasks.get(0));

    assert_ok!(executor.execute(0).await);
    assert_relative_eq!(assert_ok!(assert_some!(task.metric("c")).value(&[])), 1.0);
    assert_relative_eq!(assert_ok!(assert_some!(task.metric("total")).value(&[])), 10.0);

    assert_ok!(data_source.connection().execute_unprepared("INSERT INTO stats (v, l1) VALUES (5, 'y')").await);
    assert_ok!(executor.execute(0).await);
    assert_relative_eq!(assert_ok!(assert_some!(task.metric("c")).value(&[])), 2.0);
    assert_relative_eq!(assert_ok!(assert_some!(task.metric("total")).value(&[])), 15.0);
}
