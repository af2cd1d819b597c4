#![forbid(unsafe_code)]
#![warn(
    clippy::cargo,
    clippy::suspicious,
    // missing_docs,
    clippy::nursery,
    rust_2018_idioms
)]

pub mod catalog;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod settings;
pub mod task;

pub type Result<T> = anyhow::Result<T>;

pub const APP_NAME: &str = "query-exporter";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
