// THEORY:
// This file is the main entry point for the `deforest_vision` library crate.
// It defines the public API used by the visualizer server and the batch tester.
//
// The primary goal is to export the sequence drivers (`SequencePipeline`,
// `ParallelSequencePipeline`) and their data structures (`PipelineConfig`,
// `SequenceReport`, `TrendSummary`) as the high-level interface of the engine.
// The comparison primitives in `core_modules` stay public for callers that need
// a single pair, but most consumers never reach past the pipeline. `narrative`
// and `query` talk to an optional hosted model and never feed the measurements.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod narrative;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod query;

pub use config::{FailurePolicy, PipelineConfig};
pub use core_modules::change_detector::change_detector::{ChangeDetector, detect_change};
pub use core_modules::change_mask::change_mask::ChangeMask;
pub use core_modules::image_loader::Frame;
pub use core_modules::overlay::{OverlayRenderer, Region, render_overlay};
pub use core_modules::severity::{SeverityScale, SeverityTier};
pub use error::{Result, VisionError};
pub use parallel_pipeline::ParallelSequencePipeline;
pub use pipeline::{PairOutcome, SequencePipeline, SequenceReport, TrendSummary, run_sequence};
