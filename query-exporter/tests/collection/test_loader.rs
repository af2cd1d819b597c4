use std::path::Path;

use claims::*;
use pretty_assertions::assert_eq;
use prometheus::Registry;
use query_exporter::catalog::MetricKind;
use query_exporter::error::TaskError;
use query_exporter::scheduler::TriggerSpec;
use query_exporter::task::{self, TaskRegistry};

#[test]
fn test_load_tasks_from_file() {
    once_cell::sync::Lazy::force(&query_exporter::logging::TEST_TRACING);
    let specs = assert_ok!(task::read_tasks(Path::new("./tests/data/custom_metrics.toml")));
    assert_eq!(specs.len(), 2);

    let registry = Registry::new();
    let tasks = TaskRegistry::new();
    let loaded = assert_ok!(tasks.load(specs, &registry));

    let no_label = &loaded[0];
    assert_eq!(no_label.index(), 0);
    assert_eq!(no_label.job_name(), "context_no_label_0");
    assert_eq!(no_label.metrics().len(), 2);
    assert_eq!(no_label.trigger(), &assert_ok!(TriggerSpec::interval(std::time::Duration::from_secs(15))));

    let value_1 = assert_some!(no_label.metric("value_1"));
    assert_eq!(value_1.name(), "context_no_label_value_1");
    assert_eq!(value_1.kind(), MetricKind::Counter);
    assert!(value_1.labels().is_empty());
    let value_2 = assert_some!(no_label.metric("value_2"));
    assert_eq!(value_2.kind(), MetricKind::Gauge);

    let with_labels = &loaded[1];
    assert_eq!(with_labels.index(), 1);
    assert_eq!(with_labels.trigger(), &assert_ok!(TriggerSpec::cron("*/5 * * * *")));
    let value_1 = assert_some!(with_labels.metric("value_1"));
    assert_eq!(value_1.name(), "context_with_labels_value_1");
    assert_eq!(value_1.kind(), MetricKind::Gauge);
    assert_eq!(value_1.labels(), &["label_1".to_string(), "label_2".to_string()]);
    assert_eq!(value_1.description(), "Simple example returning always 1.");
}

#[test]
fn test_empty_task_file_loads_nothing() {
    let specs = assert_ok!(task::read_tasks(Path::new("./tests/data/empty_metrics.toml")));
    assert!(specs.is_empty());

    let tasks = TaskRegistry::new();
    let loaded = assert_ok!(tasks.load(specs, &Registry::new()));
    assert!(loaded.is_empty());
    assert!(tasks.is_empty());
}

#[test]
fn test_second_load_of_same_file_collides() {
    let registry = Registry::new();
    let tasks = TaskRegistry::new();
    let specs = assert_ok!(task::read_tasks(Path::new("./tests/data/custom_metrics.toml")));
    assert_ok!(tasks.load(specs.clone(), &registry));

    let err = assert_err!(tasks.load(specs, &registry));
    assert!(matches!(err, TaskError::DuplicateMetric(_)));
}
