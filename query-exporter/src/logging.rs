use once_cell::sync::Lazy;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_log_directives() -> String {
    std::env::var(LOG_LEVEL_ENV)
        .map(|level| level.to_lowercase())
        .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
}

/// Bunyan-formatted JSON subscriber filtered by `RUST_LOG`, falling back to `log_directives`.
pub fn get_subscriber<W>(name: impl Into<String>, log_directives: impl AsRef<str>, sink: W) -> impl Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_directives.as_ref()));
    let bunyan_formatting = BunyanFormattingLayer::new(name.into(), sink);

    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(bunyan_formatting)
}

pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) -> Result<(), SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(subscriber)
}

/// Installs a test subscriber once per test binary; output goes to stdout only when `TEST_LOG`
/// is set.
pub static TEST_TRACING: Lazy<()> = Lazy::new(|| {
    let name = "test";
    let level = "debug";
    let result = if std::env::var("TEST_LOG").is_ok() {
        init_subscriber(get_subscriber(name, level, std::io::stdout))
    } else {
        init_subscriber(get_subscriber(name, level, std::io::sink))
    };

    if let Err(err) = result {
        eprintln!("test tracing subscriber already installed: {err}");
    }
});
