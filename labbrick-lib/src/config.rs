use crate::constants::DEFAULT_RESPONSE_TIMEOUT_MS;
use crate::error::{LabBrickError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use strum_macros::Display;

/// Ordered from quietest to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TraceLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

/// Logging behaviour requested by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Level applied to this library's log target.
    pub level: TraceLevel,
    /// Level at which every frame written to or read from a device is
    /// dumped. `off` disables the dumps.
    pub io: TraceLevel,
    /// Log lines carry timestamps and targets.
    pub verbose: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            level: TraceLevel::default(),
            io: TraceLevel::Off,
            verbose: false,
        }
    }
}

impl TraceConfig {
    /// `EnvFilter`-style directive for the library's target. Frame dumps
    /// raise it so they are not filtered out.
    pub fn directive(&self) -> String {
        format!("labbrick_lib={}", self.level.max(self.io))
    }
}

/// Configuration passed to `LabBrick` at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Use the simulated bus instead of USB hardware.
    pub test_mode: bool,
    /// Bound on waiting for each reply.
    pub response_timeout_ms: u64,
    pub trace: TraceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            test_mode: false,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            trace: TraceConfig::default(),
        }
    }
}

impl Config {
    pub fn test_mode() -> Self {
        Self {
            test_mode: true,
            ..Self::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| LabBrickError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).map_err(|e| LabBrickError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(LabBrickError::Config("response_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_trace(mut self, level: TraceLevel, io: TraceLevel, verbose: bool) -> Self {
        self.trace = TraceConfig { level, io, verbose };
        self
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config::from_json(r#"{ "test_mode": true }"#).unwrap();
        assert!(config.test_mode);
        assert_eq!(config.response_timeout_ms, DEFAULT_RESPONSE_TIMEOUT_MS);
        assert_eq!(config.trace.level, TraceLevel::Warn);
    }

    #[test]
    fn trace_section_parses() {
        let config = Config::from_json(r#"{ "trace": { "level": "debug", "io": "trace", "verbose": true } }"#).unwrap();
        assert_eq!(config.trace.io, TraceLevel::Trace);
        assert!(config.trace.verbose);
        assert_eq!(config.trace.directive(), "labbrick_lib=trace");

        let config = Config::from_json(r#"{ "trace": { "level": "info" } }"#).unwrap();
        assert_eq!(config.trace.io, TraceLevel::Off);
        assert!(!config.trace.verbose);
        assert_eq!(config.trace.directive(), "labbrick_lib=info");
    }

    #[test]
    fn frame_dumps_raise_the_library_level() {
        let config = Config::default().with_trace(TraceLevel::Warn, TraceLevel::Debug, false);
        assert_eq!(config.trace.directive(), "labbrick_lib=debug");
        assert!(TraceLevel::Off < TraceLevel::Error && TraceLevel::Debug < TraceLevel::Trace);
    }

    #[test]
    fn zero_timeout_rejected() {
        let result = Config::from_json(r#"{ "response_timeout_ms": 0 }"#);
        assert!(matches!(result, Err(LabBrickError::Config(_))));
    }
}
