use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spindle_core::Context;
use thiserror::Error;

/// Errors raised while loading executor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Invalid(String),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which executor strategy to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    SingleThreaded,
    MultiThreaded,
    StaticSingleThreaded,
    Events,
}

impl ExecutorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::SingleThreaded => "single_threaded",
            ExecutorKind::MultiThreaded => "multi_threaded",
            ExecutorKind::StaticSingleThreaded => "static_single_threaded",
            ExecutorKind::Events => "events",
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single_threaded" | "single" => Ok(ExecutorKind::SingleThreaded),
            "multi_threaded" | "multi" => Ok(ExecutorKind::MultiThreaded),
            "static_single_threaded" | "static" => Ok(ExecutorKind::StaticSingleThreaded),
            "events" | "events_executor" => Ok(ExecutorKind::Events),
            other => Err(ConfigError::Invalid(format!("unknown executor kind '{other}'"))),
        }
    }
}

/// Executor configuration, typically parsed from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Strategy built by `create_executor`.
    #[serde(default = "default_kind")]
    pub kind: ExecutorKind,
    /// Worker threads for the multi-threaded strategy. 0 = auto.
    #[serde(default = "default_number_of_threads")]
    pub number_of_threads: usize,
    /// Yield the worker thread before each execution (multi-threaded only).
    #[serde(default)]
    pub yield_before_execute: bool,
    /// Upper bound for one worker wait in milliseconds (multi-threaded only).
    #[serde(default)]
    pub next_exec_timeout_ms: Option<u64>,
}

fn default_kind() -> ExecutorKind {
    ExecutorKind::SingleThreaded
}
fn default_number_of_threads() -> usize {
    0
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            number_of_threads: default_number_of_threads(),
            yield_before_execute: false,
            next_exec_timeout_ms: None,
        }
    }
}

impl ExecutorConfig {
    /// Parse from TOML, apply `SPINDLE_*` environment overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("SPINDLE_EXECUTOR_KIND") {
            self.kind = v.parse()?;
        }
        if let Ok(v) = std::env::var("SPINDLE_EXECUTOR_THREADS") {
            self.number_of_threads = v.parse().map_err(|_| {
                ConfigError::Invalid(format!("SPINDLE_EXECUTOR_THREADS: '{v}' is not a number"))
            })?;
        }
        if let Ok(v) = std::env::var("SPINDLE_YIELD_BEFORE_EXECUTE") {
            self.yield_before_execute = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        if let Ok(v) = std::env::var("SPINDLE_NEXT_EXEC_TIMEOUT_MS") {
            self.next_exec_timeout_ms = match v.trim() {
                "" | "none" => None,
                ms => Some(ms.parse().map_err(|_| {
                    ConfigError::Invalid(format!("SPINDLE_NEXT_EXEC_TIMEOUT_MS: '{v}' is not a number"))
                })?),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind != ExecutorKind::MultiThreaded && self.number_of_threads > 1 {
            return Err(ConfigError::Invalid(format!(
                "number_of_threads = {} requires kind = \"multi_threaded\", got \"{}\"",
                self.number_of_threads, self.kind
            )));
        }
        if self.next_exec_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "next_exec_timeout_ms must be positive; omit it to wait without bound".into(),
            ));
        }
        Ok(())
    }

    /// Worker count for the multi-threaded strategy: the configured value,
    /// or the available parallelism (at least two) when set to 0.
    pub fn resolved_number_of_threads(&self) -> usize {
        if self.number_of_threads > 0 {
            self.number_of_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .max(2)
        }
    }

    pub fn next_exec_timeout(&self) -> Option<Duration> {
        self.next_exec_timeout_ms.map(Duration::from_millis)
    }
}

/// Construction options shared by every strategy.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub context: Arc<Context>,
    pub config: ExecutorConfig,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            context: Context::global(),
            config: ExecutorConfig::default(),
        }
    }
}

impl ExecutorOptions {
    pub fn with_context(context: Arc<Context>) -> Self {
        Self {
            context,
            config: ExecutorConfig::default(),
        }
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg: ExecutorConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ExecutorConfig::default());
        assert_eq!(cfg.kind, ExecutorKind::SingleThreaded);
        assert!(cfg.next_exec_timeout().is_none());
    }

    #[test]
    fn parse_full_toml() {
        let cfg: ExecutorConfig = toml::from_str(
            r#"
kind = "multi_threaded"
number_of_threads = 4
yield_before_execute = true
next_exec_timeout_ms = 250
"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.kind, ExecutorKind::MultiThreaded);
        assert_eq!(cfg.resolved_number_of_threads(), 4);
        assert!(cfg.yield_before_execute);
        assert_eq!(cfg.next_exec_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let result: Result<ExecutorConfig, _> = toml::from_str(r#"kind = "round_robin""#);
        assert!(result.is_err());
        assert!("round_robin".parse::<ExecutorKind>().is_err());
        assert_eq!("static".parse::<ExecutorKind>().unwrap(), ExecutorKind::StaticSingleThreaded);
        assert_eq!("Multi-Threaded".parse::<ExecutorKind>().unwrap(), ExecutorKind::MultiThreaded);
    }

    #[test]
    fn validation_rejects_inconsistent_settings() {
        let cfg = ExecutorConfig {
            number_of_threads: 8,
            ..ExecutorConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let cfg = ExecutorConfig {
            kind: ExecutorKind::MultiThreaded,
            next_exec_timeout_ms: Some(0),
            ..ExecutorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auto_threads_is_at_least_two() {
        let cfg = ExecutorConfig {
            kind: ExecutorKind::MultiThreaded,
            ..ExecutorConfig::default()
        };
        assert!(cfg.resolved_number_of_threads() >= 2);
    }

    #[test]
    fn kind_round_trips_through_display() {
        for kind in [
            ExecutorKind::SingleThreaded,
            ExecutorKind::MultiThreaded,
            ExecutorKind::StaticSingleThreaded,
            ExecutorKind::Events,
        ] {
            assert_eq!(kind.to_string().parse::<ExecutorKind>().unwrap(), kind);
        }
    }
}
