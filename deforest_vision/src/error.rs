//! Error types for the deforest_vision engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, VisionError>;

/// Everything that can go wrong while comparing frames.
#[derive(Error, Debug)]
pub enum VisionError {
    /// Two images handed to a comparison do not share dimensions.
    #[error("shape mismatch: {}x{} vs {}x{}", left.0, left.1, right.0, right.1)]
    ShapeMismatch { left: (u32, u32), right: (u32, u32) },

    /// A sequence needs at least two frames to produce a single pair.
    #[error("insufficient input: {provided} image(s) supplied, at least {required} required")]
    InsufficientInput { provided: usize, required: usize },

    /// An input could not be interpreted as an image.
    #[error("failed to decode {source_name}: {message}")]
    DecodeFailure { source_name: String, message: String },

    #[error("invalid configuration: {parameter} = {value}")]
    InvalidConfig { parameter: String, value: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode image: {message}")]
    Encode { message: String },

    /// A comparison worker went away before answering.
    #[error("worker failure: {message}")]
    Worker { message: String },
}

impl VisionError {
    pub fn shape_mismatch(left: (u32, u32), right: (u32, u32)) -> Self {
        Self::ShapeMismatch { left, right }
    }

    pub fn decode(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::DecodeFailure {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_config(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidConfig {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that only concern a single pair of a sequence. The sequence
    /// driver hands these to its failure policy; everything else aborts.
    pub fn is_pair_local(&self) -> bool {
        matches!(
            self,
            VisionError::ShapeMismatch { .. } | VisionError::DecodeFailure { .. }
        )
    }

    /// Short machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            VisionError::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            VisionError::InsufficientInput { .. } => "INSUFFICIENT_INPUT",
            VisionError::DecodeFailure { .. } => "DECODE_FAILURE",
            VisionError::InvalidConfig { .. } => "INVALID_CONFIG",
            VisionError::Io { .. } => "IO_ERROR",
            VisionError::Encode { .. } => "ENCODE_ERROR",
            VisionError::Worker { .. } => "WORKER_FAILURE",
        }
    }
}
