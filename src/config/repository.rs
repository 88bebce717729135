use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// How read-style repository queries report infrastructure failures
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failures surface as `Outcome::Failed`
    #[default]
    Propagate,
    /// Failures are logged and collapsed into the neutral value
    /// (`NotFound`, `false`, empty list)
    Neutralize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RepositoryConfig {
    /// Applies to get/exists/children queries only; writes always propagate
    #[serde(default)]
    pub read_failure_policy: FailurePolicy,

    /// First delay of the background loop finishing a guaranteed delete
    #[serde(default = "default_background_delete_interval_ms")]
    pub background_delete_interval_ms: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            read_failure_policy: FailurePolicy::default(),
            background_delete_interval_ms: default_background_delete_interval_ms(),
        }
    }
}

impl RepositoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.background_delete_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "repository.background_delete_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn background_delete_interval(&self) -> Duration {
        Duration::from_millis(self.background_delete_interval_ms)
    }
}

fn default_background_delete_interval_ms() -> u64 {
    500
}
