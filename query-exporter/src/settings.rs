use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::error::SettingsError;

mod collection_settings;
mod database_settings;
mod http_settings;
mod scheduler_settings;

pub use collection_settings::*;
pub use database_settings::*;
pub use http_settings::*;
pub use scheduler_settings::*;

pub const DEFAULT_RESOURCES: &str = "./resources";
pub const ENV_PREFIX: &str = "APP";

/// Environment variables understood for compatibility with earlier deployments, and the setting
/// each one overrides.
const LEGACY_ENV_OVERRIDES: [(&str, &str); 2] = [
    ("DATA_SOURCE_NAME", "database.url"),
    ("CUSTOM_METRICS", "collection.custom_metrics"),
];
const MISFIRE_GRACE_TIME_ENV: &str = "MISFIRE_GRACE_TIME";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub http: HttpServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub collection: CollectionSettings,
}

#[derive(Parser, Clone, Debug, Default, PartialEq, Eq)]
#[clap(author, version, about)]
pub struct CliOptions {
    /// override the configuration file to load. Default behavior is to load `application.*` from
    /// the resources directory if present.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Override default location from which to load configuration files. Default directory is
    /// ./resources.
    #[clap(short, long)]
    pub resources: Option<PathBuf>,

    /// TOML file declaring the collection tasks.
    #[clap(short = 'm', long)]
    pub custom_metrics: Option<PathBuf>,

    /// Seconds a triggered query may start late before the run is dropped.
    #[clap(short = 'g', long)]
    pub misfire_grace_time: Option<u64>,

    /// Address the metrics endpoint binds to.
    #[clap(long)]
    pub host: Option<String>,

    /// Port the metrics endpoint listens on.
    #[clap(short, long)]
    pub port: Option<u16>,
}

impl CliOptions {
    fn load_overrides(&self, config: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, SettingsError> {
        let config = match &self.custom_metrics {
            None => config,
            Some(path) => config.set_override("collection.custom_metrics", path.to_string_lossy().to_string())?,
        };

        let config = match self.misfire_grace_time {
            None => config,
            Some(secs) => config.set_override("scheduler.misfire_grace_time_secs", secs as i64)?,
        };

        let config = match &self.host {
            None => config,
            Some(host) => config.set_override("http.host", host.as_str())?,
        };

        let config = match self.port {
            None => config,
            Some(port) => config.set_override("http.port", port as i64)?,
        };

        Ok(config)
    }
}

impl Settings {
    /// Loads settings from, in increasing precedence: defaults, the configuration file,
    /// `APP__`-prefixed environment variables, the legacy environment variables and finally the
    /// command line.
    #[tracing::instrument(level = "info")]
    pub fn load(options: &CliOptions) -> Result<Self, SettingsError> {
        Self::load_from(options, std::env::vars().collect())
    }

    pub fn load_from(options: &CliOptions, env: HashMap<String, String>) -> Result<Self, SettingsError> {
        let config = Config::builder();

        let config = match &options.config {
            Some(path) => {
                tracing::info!(?path, "loading configuration file");
                config.add_source(File::from(path.as_path()).required(true))
            },
            None => {
                let resources = options
                    .resources
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RESOURCES));
                let basename = resources.join("application");
                config.add_source(File::with_name(basename.to_string_lossy().as_ref()).required(false))
            },
        };

        let config = config.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(Some(env.clone())),
        );

        let config = Self::load_legacy_env_overrides(config, &env)?;
        let config = options.load_overrides(config)?;

        let settings: Self = config.build()?.try_deserialize()?;
        tracing::debug!(?settings, "settings loaded");
        Ok(settings)
    }

    fn load_legacy_env_overrides(
        mut config: ConfigBuilder<DefaultState>, env: &HashMap<String, String>,
    ) -> Result<ConfigBuilder<DefaultState>, SettingsError> {
        for (var, key) in LEGACY_ENV_OVERRIDES {
            if let Some(value) = env.get(var) {
                config = config.set_override(key, value.as_str())?;
            }
        }

        if let Some(value) = env.get(MISFIRE_GRACE_TIME_ENV) {
            let secs: u64 = value.trim().parse().map_err(|_| SettingsError::InvalidEnvironment {
                variable: MISFIRE_GRACE_TIME_ENV.to_string(),
                value: value.clone(),
            })?;
            config = config.set_override("scheduler.misfire_grace_time_secs", secs as i64)?;
        }

        Ok(config)
    }
}
