//! Scheduler configuration (`lull.toml`).
//!
//! # Sections
//!
//! | Section            | Purpose                                        |
//! |--------------------|------------------------------------------------|
//! | `[clock]`          | Expiration bucket width                        |
//! | `[clock.window]`   | Per-priority expiration windows                |
//! | `[boundary]`       | Default debounce and timeout for boundaries    |
//! | `[executor]`       | Cooperative slice budget                       |
//!
//! Every field has a default, so an empty file (or no file) is valid.

mod error;
mod section;

pub use error::{ConfigDiagnostic, ConfigDiagnostics, ConfigError, FieldPath};
pub use section::{BoundaryConfig, ClockConfig, ExecutorConfig, WindowConfig};

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::log;

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing `lull.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Virtual clock and expiration windows
    pub clock: ClockConfig,

    /// Boundary defaults
    pub boundary: BoundaryConfig,

    /// Cooperative execution
    pub executor: ExecutorConfig,
}

impl SchedulerConfig {
    /// Parse configuration from a TOML string and validate it.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let (config, ignored) = Self::parse_with_ignored(content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, None);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path with unknown field detection.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, Some(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    /// Print warning about unknown fields.
    fn print_unknown_fields_warning(fields: &[String], path: Option<&Path>) {
        let display_path = path
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        log!("warning"; "unknown fields in {}, ignoring: {}", display_path, fields.join(", "));
    }

    /// Validate all sections, collecting every problem before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut diag = ConfigDiagnostics::new();
        self.clock.validate(&mut diag);
        self.executor.validate(&mut diag);
        diag.into_result().map_err(ConfigError::Diagnostics)
    }
}

#[cfg(test)]
pub fn test_parse_config(content: &str) -> SchedulerConfig {
    let (parsed, ignored) = SchedulerConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Priority;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = test_parse_config("");
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.clock.bucket_width, 25);
        assert_eq!(config.clock.window(Priority::Normal), 5_000);
        assert_eq!(config.clock.window(Priority::Sync), 0);
        assert_eq!(config.boundary.debounce, 0);
        assert_eq!(config.boundary.timeout, None);
        assert_eq!(config.executor.slice_budget, 64);
    }

    #[test]
    fn test_sections() {
        let config = test_parse_config(
            "[clock]\nbucket_width = 10\n[clock.window]\nnormal = 300\n\
             [boundary]\ndebounce = 50\ntimeout = 900\n[executor]\nslice_budget = 3",
        );
        assert_eq!(config.clock.bucket_width, 10);
        assert_eq!(config.clock.window(Priority::Normal), 300);
        // Unset windows keep their defaults
        assert_eq!(config.clock.window(Priority::UserBlocking), 250);
        assert_eq!(config.boundary.debounce, 50);
        assert_eq!(config.boundary.timeout, Some(900));
        assert_eq!(config.executor.slice_budget, 3);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let result = SchedulerConfig::from_str(
            "[clock]\nbucket_width = 0\n[clock.window]\nnormal = 10\nuser_blocking = 20\n\
             [executor]\nslice_budget = 0",
        );
        match result {
            Err(ConfigError::Diagnostics(diag)) => assert_eq!(diag.len(), 3),
            other => panic!("expected diagnostics, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_are_reported_not_fatal() {
        let (config, ignored) =
            SchedulerConfig::parse_with_ignored("[clock]\nbucket_widht = 3").unwrap();
        assert_eq!(ignored, vec!["clock.bucket_widht".to_string()]);
        assert_eq!(config.clock.bucket_width, 25);
    }

    #[test]
    fn test_invalid_toml() {
        let result = SchedulerConfig::from_str("[clock\nbucket_width = 1");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[boundary]\ndebounce = 120").unwrap();

        let config = SchedulerConfig::from_path(file.path()).unwrap();
        assert_eq!(config.boundary.debounce, 120);

        let missing = SchedulerConfig::from_path(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(..))));
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        assert_eq!(
            SchedulerConfig::load(None).unwrap(),
            SchedulerConfig::default()
        );
    }
}
