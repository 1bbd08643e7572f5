// THEORY:
// Severity is a coarse, human-facing reading of a region's size. A region of
// change is bucketed by its enclosed area into one of three tiers, and each tier
// carries the color used to paint it on the overlay. Colors darken as severity
// increases so that large clearings read as the most alarming.
//
// The scale is plain configuration. Nothing in the engine hard-codes the
// thresholds; tests check the exact boundaries through the same structure.

use crate::error::{Result, VisionError};
use image::Rgb;
use serde::{Deserialize, Serialize};

/// Severity bucket of a region. Ordering follows increasing area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    Low,
    Medium,
    High,
}

impl SeverityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityTier::Low => "low",
            SeverityTier::Medium => "medium",
            SeverityTier::High => "high",
        }
    }
}

/// Area thresholds and fill colors for the three tiers.
///
/// `area < medium_threshold` is low, `area < high_threshold` is medium,
/// everything else is high.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityScale {
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub low_color: [u8; 3],
    pub medium_color: [u8; 3],
    pub high_color: [u8; 3],
}

impl Default for SeverityScale {
    fn default() -> Self {
        Self {
            medium_threshold: 1000.0,
            high_threshold: 3500.0,
            low_color: [255, 127, 127],
            medium_color: [255, 60, 60],
            high_color: [139, 40, 40],
        }
    }
}

impl SeverityScale {
    pub fn classify(&self, area: f64) -> SeverityTier {
        if area < self.medium_threshold {
            SeverityTier::Low
        } else if area < self.high_threshold {
            SeverityTier::Medium
        } else {
            SeverityTier::High
        }
    }

    pub fn color(&self, tier: SeverityTier) -> Rgb<u8> {
        match tier {
            SeverityTier::Low => Rgb(self.low_color),
            SeverityTier::Medium => Rgb(self.medium_color),
            SeverityTier::High => Rgb(self.high_color),
        }
    }

    /// Thresholds must be finite, non-negative and ordered.
    pub fn validate(&self) -> Result<()> {
        if !self.medium_threshold.is_finite() || self.medium_threshold < 0.0 {
            return Err(VisionError::invalid_config(
                "severity.medium_threshold",
                self.medium_threshold,
            ));
        }
        if !self.high_threshold.is_finite() || self.high_threshold < self.medium_threshold {
            return Err(VisionError::invalid_config(
                "severity.high_threshold",
                self.high_threshold,
            ));
        }
        Ok(())
    }
}
