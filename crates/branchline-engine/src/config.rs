//! Engine configuration
//!
//! Loaded from TOML; every field has a default so a partial file is valid.
//!
//! ```toml
//! max_generation_attempts = 2
//! strict_version_resolution = false
//! page_timeout_secs = 300
//!
//! [pacing]
//! nudge_after_pages = 4
//!
//! [logging]
//! filter = "branchline_engine=debug,info"
//! json = true
//! ```

use crate::error::ConfigError;
use crate::pipeline::MAX_GENERATION_ATTEMPTS;
use branchline_structure::ResolutionMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Page engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Generation attempts per page, clamped to `1..=2`
    pub max_generation_attempts: u32,
    /// Fail instead of falling back when a parent's version id does not resolve
    pub strict_version_resolution: bool,
    /// Per-page timeout in seconds; 0 disables it
    pub page_timeout_secs: u64,
    /// Pacing nudge settings
    pub pacing: PacingConfig,
    /// Tracing settings
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With generation attempt limit
    #[inline]
    #[must_use]
    pub fn with_max_generation_attempts(mut self, attempts: u32) -> Self {
        self.max_generation_attempts = attempts;
        self
    }

    /// With strict version resolution
    #[inline]
    #[must_use]
    pub fn with_strict_version_resolution(mut self, strict: bool) -> Self {
        self.strict_version_resolution = strict;
        self
    }

    /// With page timeout
    #[inline]
    #[must_use]
    pub fn with_page_timeout_secs(mut self, secs: u64) -> Self {
        self.page_timeout_secs = secs;
        self
    }

    /// With pacing settings
    #[inline]
    #[must_use]
    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// With logging settings
    #[inline]
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Attempt limit after clamping
    #[inline]
    #[must_use]
    pub fn generation_attempts(&self) -> u32 {
        self.max_generation_attempts.clamp(1, MAX_GENERATION_ATTEMPTS)
    }

    /// Version resolution mode
    #[inline]
    #[must_use]
    pub fn resolution_mode(&self) -> ResolutionMode {
        if self.strict_version_resolution {
            ResolutionMode::Strict
        } else {
            ResolutionMode::Lenient
        }
    }

    /// Page timeout, `None` when disabled
    #[inline]
    #[must_use]
    pub fn page_timeout(&self) -> Option<Duration> {
        (self.page_timeout_secs > 0).then(|| Duration::from_secs(self.page_timeout_secs))
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML or mistyped fields
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - `ConfigError::Parse` on malformed TOML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_generation_attempts: MAX_GENERATION_ATTEMPTS,
            strict_version_resolution: false,
            page_timeout_secs: 300,
            pacing: PacingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Pacing nudge settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Pages a beat may run before a nudge; derived from the budget when unset
    pub nudge_after_pages: Option<u32>,
}

/// Tracing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `BRANCHLINE_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.generation_attempts(), 2);
        assert_eq!(config.resolution_mode(), ResolutionMode::Lenient);
        assert_eq!(config.page_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.pacing.nudge_after_pages, None);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn attempts_are_clamped() {
        assert_eq!(EngineConfig::new().with_max_generation_attempts(0).generation_attempts(), 1);
        assert_eq!(EngineConfig::new().with_max_generation_attempts(7).generation_attempts(), 2);
    }

    #[test]
    fn zero_timeout_disables() {
        assert_eq!(EngineConfig::new().with_page_timeout_secs(0).page_timeout(), None);
    }

    #[test]
    fn partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            strict_version_resolution = true

            [pacing]
            nudge_after_pages = 3

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(
            config,
            EngineConfig::new()
                .with_strict_version_resolution(true)
                .with_pacing(PacingConfig {
                    nudge_after_pages: Some(3)
                })
                .with_logging(LoggingConfig {
                    filter: "info".to_string(),
                    json: true
                })
        );
        assert_eq!(config.resolution_mode(), ResolutionMode::Strict);
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = EngineConfig::from_toml_str("page_timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::from_file("/nonexistent/branchline.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
