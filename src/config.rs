use chrono_tz::Tz;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::retry::RetryPolicy;
use crate::constants::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_TIMEZONE, DEFAULT_TOLERANCE,
};
use crate::domain::{Frequency, HourConvention};
use crate::error::{ReconcileError, Result};
use crate::pipeline::ReconcileSettings;

/// One pipeline's TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub hour_convention: HourConvention,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub check_persisted_continuity: bool,
    /// Persisted history to load before the first fresh instant
    pub lookback_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Where the warnings file goes; defaults next to the store
    pub warnings: Option<PathBuf>,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            ReconcileError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        Self::parse(&config_content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.name.trim().is_empty() {
            return Err(ReconcileError::Config("pipeline.name must not be empty".to_string()));
        }
        if !self.pipeline.tolerance.is_finite() || self.pipeline.tolerance < 0.0 {
            return Err(ReconcileError::Config(format!(
                "pipeline.tolerance must be a non-negative number, got {}",
                self.pipeline.tolerance
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReconcileError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.pipeline
            .timezone
            .parse::<Tz>()
            .map_err(|_| ReconcileError::UnknownTimezone(self.pipeline.timezone.clone()))
    }

    pub fn settings(&self) -> Result<ReconcileSettings> {
        Ok(ReconcileSettings::new(
            self.pipeline.dimensions.clone(),
            self.pipeline.frequency,
            self.timezone()?,
        )
        .with_hour_convention(self.pipeline.hour_convention)
        .with_tolerance(self.pipeline.tolerance)
        .with_persisted_continuity(self.pipeline.check_persisted_continuity))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [pipeline]
        name = "zone_load"
        dimensions = ["zone", "type"]
        frequency = "hourly"
        timezone = "America/Chicago"
        hour_convention = "hour_beginning"
        tolerance = 0.5
        check_persisted_continuity = true
        lookback_days = 14

        [retry]
        max_attempts = 5
        backoff_ms = 250

        [output]
        warnings = "out/warnings.txt"
    "#;

    #[test]
    fn test_full_config() {
        let config = Config::parse(FULL).unwrap();
        let settings = config.settings().unwrap();

        assert_eq!(settings.dimension_names, vec!["zone", "type"]);
        assert_eq!(settings.timezone, chrono_tz::America::Chicago);
        assert_eq!(settings.hour_convention, HourConvention::HourBeginning);
        assert_eq!(settings.tolerance, 0.5);
        assert!(settings.check_persisted_continuity);
        assert_eq!(config.pipeline.lookback_days, Some(14));
        assert_eq!(config.retry_policy().max_attempts(), 5);
        assert_eq!(config.output.warnings, Some(PathBuf::from("out/warnings.txt")));
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("[pipeline]\nname = \"lmp\"\nfrequency = \"daily\"\n").unwrap();
        let settings = config.settings().unwrap();

        assert_eq!(settings.frequency, Frequency::Daily);
        assert_eq!(settings.timezone, chrono_tz::America::New_York);
        assert_eq!(settings.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(settings.hour_convention, HourConvention::HourEnding);
        assert_eq!(config.retry.max_attempts, DEFAULT_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let err = Config::parse("[pipeline]\nname = \"x\"\ntimezone = \"Mars/Olympus\"\n").unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownTimezone(_)));
    }

    #[test]
    fn test_negative_tolerance_is_rejected() {
        let err = Config::parse("[pipeline]\nname = \"x\"\ntolerance = -1.0\n").unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/pipeline.toml")).unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
    }
}
