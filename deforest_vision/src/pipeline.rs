// THEORY:
// The `pipeline` module is the top-level API of the engine. It walks an ordered
// series of frames, compares every consecutive pair, renders each comparison and
// reduces the percentages into a trend. Callers hand it frames and receive a
// `SequenceReport`; they never touch detectors or renderers directly.
//
// A pair that cannot be compared (undecodable frame, mismatched dimensions) is
// handled by an explicit `FailurePolicy`: either the whole run fails, or the pair
// is recorded as skipped with its reason. A skipped pair never carries a made-up
// percentage and never contributes to the trend.

use crate::config::{FailurePolicy, PipelineConfig};
use crate::core_modules::change_detector::change_detector::ChangeDetector;
use crate::core_modules::change_mask::change_mask::{ChangeMask, round2};
use crate::core_modules::image_loader::Frame;
use crate::core_modules::overlay::{OverlayRenderer, Region};
use crate::core_modules::severity::SeverityTier;
use crate::error::{Result, VisionError};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Minimum number of frames for a single comparison.
pub const MIN_FRAMES: usize = 2;

/// Full result of comparing one consecutive pair.
#[derive(Debug, Clone)]
pub struct PairReport {
    /// 1-based index of the earlier frame.
    pub label: String,
    /// "earlier-later", e.g. "1-2".
    pub period: String,
    pub percentage: f64,
    pub regions: Vec<Region>,
    /// Rendered against the later (post-change) frame.
    pub overlay: RgbImage,
    pub mask: ChangeMask,
}

/// What happened to one pair of the sequence.
#[derive(Debug, Clone)]
pub enum PairOutcome {
    Compared(PairReport),
    Skipped {
        label: String,
        period: String,
        reason: String,
    },
}

impl PairOutcome {
    pub fn label(&self) -> &str {
        match self {
            PairOutcome::Compared(report) => &report.label,
            PairOutcome::Skipped { label, .. } => label,
        }
    }

    pub fn period(&self) -> &str {
        match self {
            PairOutcome::Compared(report) => &report.period,
            PairOutcome::Skipped { period, .. } => period,
        }
    }

    pub fn percentage(&self) -> Option<f64> {
        match self {
            PairOutcome::Compared(report) => Some(report.percentage),
            PairOutcome::Skipped { .. } => None,
        }
    }

    pub fn overlay(&self) -> Option<&RgbImage> {
        match self {
            PairOutcome::Compared(report) => Some(&report.overlay),
            PairOutcome::Skipped { .. } => None,
        }
    }

    pub fn summary(&self) -> PairSummary {
        match self {
            PairOutcome::Compared(report) => PairSummary {
                label: report.label.clone(),
                period: report.period.clone(),
                status: PairStatus::Compared,
                percentage: Some(report.percentage),
                reason: None,
                severity_counts: SeverityCounts::from_regions(&report.regions),
                regions: report.regions.clone(),
            },
            PairOutcome::Skipped {
                label,
                period,
                reason,
            } => PairSummary {
                label: label.clone(),
                period: period.clone(),
                status: PairStatus::Skipped,
                percentage: None,
                reason: Some(reason.clone()),
                severity_counts: SeverityCounts::default(),
                regions: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Compared,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl SeverityCounts {
    pub fn from_regions(regions: &[Region]) -> Self {
        let mut counts = Self::default();
        for region in regions {
            match region.tier {
                SeverityTier::Low => counts.low += 1,
                SeverityTier::Medium => counts.medium += 1,
                SeverityTier::High => counts.high += 1,
            }
        }
        counts
    }
}

/// Serializable view of a pair outcome, without pixel data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSummary {
    pub label: String,
    pub period: String,
    pub status: PairStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub severity_counts: SeverityCounts,
    pub regions: Vec<Region>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub label: String,
    pub period: String,
    pub percentage: f64,
}

/// Reductions over the compared pairs of a sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendSummary {
    pub total: f64,
    pub average: f64,
    pub peak: Option<TrendPoint>,
    pub lowest: Option<TrendPoint>,
    pub latest: Option<TrendPoint>,
    pub compared_pairs: usize,
    pub skipped_pairs: usize,
}

impl TrendSummary {
    pub fn from_outcomes(outcomes: &[PairOutcome]) -> Self {
        let points: Vec<TrendPoint> = outcomes
            .iter()
            .filter_map(|o| {
                o.percentage().map(|percentage| TrendPoint {
                    label: o.label().to_string(),
                    period: o.period().to_string(),
                    percentage,
                })
            })
            .collect();
        let skipped_pairs = outcomes.len() - points.len();
        if points.is_empty() {
            return Self {
                skipped_pairs,
                ..Self::default()
            };
        }

        let total: f64 = points.iter().map(|p| p.percentage).sum();
        let average = total / points.len() as f64;
        // First occurrence wins on ties.
        let peak = points
            .iter()
            .fold(None::<&TrendPoint>, |best, p| match best {
                Some(b) if b.percentage >= p.percentage => Some(b),
                _ => Some(p),
            })
            .cloned();
        let lowest = points
            .iter()
            .fold(None::<&TrendPoint>, |best, p| match best {
                Some(b) if b.percentage <= p.percentage => Some(b),
                _ => Some(p),
            })
            .cloned();

        Self {
            total: round2(total),
            average: round2(average),
            peak,
            lowest,
            latest: points.last().cloned(),
            compared_pairs: points.len(),
            skipped_pairs,
        }
    }
}

/// The primary output of the pipeline for a series of frames.
#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub pairs: Vec<PairOutcome>,
    pub trend: TrendSummary,
}

impl SequenceReport {
    pub fn from_outcomes(pairs: Vec<PairOutcome>) -> Self {
        let trend = TrendSummary::from_outcomes(&pairs);
        Self { pairs, trend }
    }

    pub fn labels(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.label().to_string()).collect()
    }

    pub fn periods(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.period().to_string()).collect()
    }

    pub fn percentages(&self) -> Vec<Option<f64>> {
        self.pairs.iter().map(PairOutcome::percentage).collect()
    }

    pub fn overlays(&self) -> Vec<Option<&RgbImage>> {
        self.pairs.iter().map(PairOutcome::overlay).collect()
    }

    pub fn compared(&self) -> impl Iterator<Item = &PairReport> {
        self.pairs.iter().filter_map(|p| match p {
            PairOutcome::Compared(report) => Some(report),
            PairOutcome::Skipped { .. } => None,
        })
    }

    pub fn summaries(&self) -> Vec<PairSummary> {
        self.pairs.iter().map(PairOutcome::summary).collect()
    }
}

/// Sequential driver: compares consecutive frames one pair at a time.
#[derive(Debug, Clone)]
pub struct SequencePipeline {
    detector: ChangeDetector,
    renderer: OverlayRenderer,
    policy: FailurePolicy,
}

impl Default for SequencePipeline {
    fn default() -> Self {
        Self {
            detector: ChangeDetector::default(),
            renderer: OverlayRenderer::default(),
            policy: FailurePolicy::default(),
        }
    }
}

impl SequencePipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector: ChangeDetector::new(config.detector.clone())?,
            renderer: OverlayRenderer::new(config.severity.clone(), config.min_fill_area),
            policy: config.sequence.failure_policy,
        })
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Compares frames `index` and `index + 1`.
    pub fn compare_pair(
        &self,
        index: usize,
        earlier: &GrayImage,
        later: &GrayImage,
    ) -> Result<PairReport> {
        let mask = self.detector.detect(earlier, later)?;
        let percentage = mask.percent_changed();
        let overlay = self.renderer.render(later, &mask)?;
        debug!(
            pair = index + 1,
            percentage,
            regions = overlay.regions.len(),
            "pair compared"
        );
        Ok(PairReport {
            label: pair_label(index),
            period: pair_period(index),
            percentage,
            regions: overlay.regions,
            overlay: overlay.image,
            mask,
        })
    }

    /// Compares a pair whose frames may have failed to load and applies the
    /// failure policy to pair-local errors.
    pub(crate) fn pair_outcome(
        &self,
        index: usize,
        earlier: Result<&GrayImage>,
        later: Result<&GrayImage>,
    ) -> Result<PairOutcome> {
        let result = earlier
            .and_then(|a| later.map(|b| (a, b)))
            .and_then(|(a, b)| self.compare_pair(index, a, b));
        match result {
            Ok(report) => Ok(PairOutcome::Compared(report)),
            Err(e) if e.is_pair_local() && self.policy == FailurePolicy::SkipWithMarker => {
                warn!(pair = index + 1, error = %e, "pair skipped");
                Ok(PairOutcome::Skipped {
                    label: pair_label(index),
                    period: pair_period(index),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Runs the driver over decoded images.
    pub fn run(&self, images: &[GrayImage]) -> Result<SequenceReport> {
        ensure_enough(images.len())?;
        let mut pairs = Vec::with_capacity(images.len() - 1);
        for (i, window) in images.windows(2).enumerate() {
            pairs.push(self.pair_outcome(i, Ok(&window[0]), Ok(&window[1]))?);
        }
        Ok(self.finish(pairs))
    }

    /// Runs the driver over loader frames; undecodable frames are `DecodeFailure`s.
    pub fn run_frames(&self, frames: &[Frame]) -> Result<SequenceReport> {
        ensure_enough(frames.len())?;
        let mut pairs = Vec::with_capacity(frames.len() - 1);
        for (i, window) in frames.windows(2).enumerate() {
            pairs.push(self.pair_outcome(i, window[0].require_image(), window[1].require_image())?);
        }
        Ok(self.finish(pairs))
    }

    pub(crate) fn finish(&self, pairs: Vec<PairOutcome>) -> SequenceReport {
        let report = SequenceReport::from_outcomes(pairs);
        info!(
            pairs = report.pairs.len(),
            skipped = report.trend.skipped_pairs,
            total = report.trend.total,
            average = report.trend.average,
            "sequence analyzed"
        );
        report
    }
}

/// Compares every consecutive pair with default settings and fails on the
/// first bad pair. Returns aligned labels, percentages and overlays.
pub fn run_sequence(ordered_images: &[GrayImage]) -> Result<(Vec<String>, Vec<f64>, Vec<RgbImage>)> {
    let config = PipelineConfig {
        sequence: crate::config::SequenceConfig {
            failure_policy: FailurePolicy::Abort,
            ..Default::default()
        },
        ..PipelineConfig::default()
    };
    let report = SequencePipeline::new(&config)?.run(ordered_images)?;

    let mut labels = Vec::with_capacity(report.pairs.len());
    let mut percentages = Vec::with_capacity(report.pairs.len());
    let mut overlays = Vec::with_capacity(report.pairs.len());
    for outcome in report.pairs {
        if let PairOutcome::Compared(pair) = outcome {
            labels.push(pair.label);
            percentages.push(pair.percentage);
            overlays.push(pair.overlay);
        }
    }
    Ok((labels, percentages, overlays))
}

pub(crate) fn ensure_enough(provided: usize) -> Result<()> {
    if provided < MIN_FRAMES {
        return Err(VisionError::InsufficientInput {
            provided,
            required: MIN_FRAMES,
        });
    }
    Ok(())
}

pub fn pair_label(index: usize) -> String {
    (index + 1).to_string()
}

pub fn pair_period(index: usize) -> String {
    format!("{}-{}", index + 1, index + 2)
}
