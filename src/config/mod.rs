//! Configuration management for the coordination client.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`COORD__` prefix)
//! - Component-wise validation
mod repository;
mod retry;
mod session;
pub use repository::*;
pub use retry::*;
pub use session::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "COORD";

/// Main configuration container for the coordination client
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone)]
pub struct CoordConfig {
    /// Whether a client should be started at all
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// Connection, namespace and credential settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Backoff policy for transient connection failures
    #[serde(default)]
    pub retry: BackoffPolicy,
    /// Node repository behaviour
    #[serde(default)]
    pub repository: RepositoryConfig,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            enable: default_enable(),
            session: SessionConfig::default(),
            retry: BackoffPolicy::default(),
            repository: RepositoryConfig::default(),
        }
    }
}

impl Debug for CoordConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        // digest stays out of logs
        f.debug_struct("CoordConfig")
            .field("enable", &self.enable)
            .field("server_addr", &self.session.server_addr)
            .field("namespace", &self.session.namespace)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CoordConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `COORD__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred to allow further overrides via `with_override_config()`.
    /// Callers MUST call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/coordkit.toml");
    /// std::env::set_var("COORD__SESSION__NAMESPACE", "/app");
    /// let cfg = CoordConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.session.validate()?;
        self.retry.validate()?;
        self.repository.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

fn default_enable() -> bool {
    true
}
