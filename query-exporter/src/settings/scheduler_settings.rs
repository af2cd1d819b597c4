use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::scheduler::DEFAULT_MISFIRE_GRACE;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// How late a triggered query may still start before the run is dropped.
    #[serde(rename = "misfire_grace_time_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub misfire_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { misfire_grace: DEFAULT_MISFIRE_GRACE }
    }
}
