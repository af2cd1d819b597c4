use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CUSTOM_METRICS: &str = "./custom_metrics.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    /// TOML document declaring the collection tasks under `[[metric]]`.
    pub custom_metrics: PathBuf,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self { custom_metrics: PathBuf::from(DEFAULT_CUSTOM_METRICS) }
    }
}
