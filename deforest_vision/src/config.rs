//! Tunable parameters for the comparison pipeline.
//!
//! Defaults reproduce the reference numbers: a 5×5 Gaussian kernel, a closing
//! disk of radius 7, severity thresholds at 1000 and 3500, no minimum fill area,
//! and skip-with-marker handling of failing pairs.
//!
//! ```no_run
//! use deforest_vision::config::PipelineConfig;
//! use std::path::Path;
//!
//! let mut config = PipelineConfig::from_toml_file(Path::new("pipeline.toml"))?;
//! config.apply_env_overrides()?;
//! # Ok::<(), deforest_vision::VisionError>(())
//! ```

use crate::core_modules::severity::SeverityScale;
use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_MIN_FILL_AREA: &str = "DV_MIN_FILL_AREA";
pub const ENV_FAILURE_POLICY: &str = "DV_FAILURE_POLICY";
pub const ENV_CLOSING_RADIUS: &str = "DV_CLOSING_RADIUS";

/// Complete configuration for one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub severity: SeverityScale,
    pub sequence: SequenceConfig,
    /// Regions whose area is not strictly above this floor are reported but
    /// not painted. `None` paints every region.
    pub min_fill_area: Option<f64>,
}

/// Parameters of the per-image normalization done before comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Side of the square Gaussian support. Must be odd.
    pub blur_kernel_size: u32,
    /// Radius of the disk used for morphological closing.
    pub closing_radius: u8,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: 5,
            closing_radius: 7,
        }
    }
}

/// What the sequence driver does with a pair that cannot be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The first failing pair fails the whole sequence.
    Abort,
    /// The failing pair is recorded as skipped and the sequence continues.
    #[default]
    SkipWithMarker,
}

impl std::str::FromStr for FailurePolicy {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "skip" | "skip_with_marker" => Ok(FailurePolicy::SkipWithMarker),
            other => Err(VisionError::invalid_config("failure_policy", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SequenceConfig {
    pub failure_policy: FailurePolicy,
    /// Upper bound on concurrently compared pairs for the parallel driver.
    /// `None` uses the number of logical CPUs.
    pub parallelism: Option<usize>,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| VisionError::invalid_config("toml", e.message()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| VisionError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VisionError::invalid_config("toml", e))
    }

    /// Applies `DV_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = value(ENV_MIN_FILL_AREA) {
            let raw = raw.trim();
            self.min_fill_area = if raw.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(
                    raw.parse::<f64>()
                        .map_err(|_| VisionError::invalid_config(ENV_MIN_FILL_AREA, raw))?,
                )
            };
        }
        if let Some(raw) = value(ENV_FAILURE_POLICY) {
            self.sequence.failure_policy = raw.parse()?;
        }
        if let Some(raw) = value(ENV_CLOSING_RADIUS) {
            self.detector.closing_radius = raw
                .trim()
                .parse::<u8>()
                .map_err(|_| VisionError::invalid_config(ENV_CLOSING_RADIUS, raw.trim()))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let k = self.detector.blur_kernel_size;
        if k == 0 || k % 2 == 0 {
            return Err(VisionError::invalid_config("detector.blur_kernel_size", k));
        }
        self.severity.validate()?;
        if let Some(floor) = self.min_fill_area {
            if !floor.is_finite() || floor < 0.0 {
                return Err(VisionError::invalid_config("min_fill_area", floor));
            }
        }
        if self.sequence.parallelism == Some(0) {
            return Err(VisionError::invalid_config("sequence.parallelism", 0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_reference_pipeline() {
        let config = PipelineConfig::default();
        assert_eq!(config.detector.blur_kernel_size, 5);
        assert_eq!(config.detector.closing_radius, 7);
        assert_eq!(config.severity.medium_threshold, 1000.0);
        assert_eq!(config.severity.high_threshold, 3500.0);
        assert_eq!(config.min_fill_area, None);
        assert_eq!(config.sequence.failure_policy, FailurePolicy::SkipWithMarker);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            min_fill_area = 100.0

            [sequence]
            failure_policy = "abort"

            [severity]
            high_threshold = 5000.0
            "#,
        )
        .unwrap();
        assert_eq!(config.min_fill_area, Some(100.0));
        assert_eq!(config.sequence.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.severity.high_threshold, 5000.0);
        assert_eq!(config.severity.medium_threshold, 1000.0);
        assert_eq!(config.detector.closing_radius, 7);
    }

    #[test]
    fn toml_round_trip_preserves_config() {
        let config = PipelineConfig {
            min_fill_area: Some(100.0),
            ..PipelineConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn even_kernel_is_rejected() {
        let err = PipelineConfig::from_toml_str("[detector]\nblur_kernel_size = 4\n").unwrap_err();
        assert!(matches!(err, VisionError::InvalidConfig { .. }));
    }

    #[test]
    fn overrides_apply_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_MIN_FILL_AREA, "100"),
            (ENV_FAILURE_POLICY, "abort"),
            (ENV_CLOSING_RADIUS, "3"),
        ]
        .into_iter()
        .collect();
        let mut config = PipelineConfig::default();
        config
            .apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.min_fill_area, Some(100.0));
        assert_eq!(config.sequence.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.detector.closing_radius, 3);

        config
            .apply_overrides_from(|k| (k == ENV_MIN_FILL_AREA).then(|| "none".to_string()))
            .unwrap();
        assert_eq!(config.min_fill_area, None);
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides_from(|k| (k == ENV_FAILURE_POLICY).then(|| "retry".to_string()))
            .unwrap_err();
        assert!(matches!(err, VisionError::InvalidConfig { .. }));
    }
}
