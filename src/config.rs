//! Runtime configuration
//!
//! Layered from built-in defaults, an optional file, and `DOCFLOW_`
//! prefixed environment variables (`DOCFLOW_SANDBOX__TIMEOUT_MS=500`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Validator execution limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Validator scripts running at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Wall-clock limit per validator invocation, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Interpreter steps per validator invocation
    #[serde(default = "default_fuel")]
    pub fuel: u64,
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_timeout_ms(),
            fuel: default_fuel(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_fuel() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RuntimeConfig {
    /// Load configuration: defaults, then `path` if given and present,
    /// then the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&RuntimeConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DOCFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder.build()?.try_deserialize()?;
        config.validated()
    }

    fn validated(self) -> Result<Self, config::ConfigError> {
        if self.sandbox.max_concurrency == 0 {
            return Err(config::ConfigError::Message(
                "sandbox.max_concurrency must be at least 1".into(),
            ));
        }
        if self.sandbox.timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "sandbox.timeout_ms must be positive".into(),
            ));
        }
        Ok(self)
    }
}
