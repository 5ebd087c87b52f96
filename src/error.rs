use crate::common::*;
use thiserror::Error;

/// Failures of the inference and validation pipeline.
///
/// Configuration and weights errors abort a run. Every other variant is
/// scoped to one tile.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("configuration record not found at {path:?}")]
    MissingConfig { path: PathBuf },
    #[error("malformed configuration record {path:?}: {reason}")]
    MalformedConfig { path: PathBuf, reason: String },
    #[error("class id {found} out of range, the checkpoint was trained with {expected} classes")]
    ClassCountMismatch { found: u32, expected: usize },
    #[error("dimension mismatch: {left} is {left_size:?}, {right} is {right_size:?}")]
    DimensionMismatch {
        left: String,
        left_size: (usize, usize),
        right: String,
        right_size: (usize, usize),
    },
    #[error("failed to load weights from {path:?}: {reason}")]
    WeightsLoad { path: PathBuf, reason: String },
    #[error("forward pass failed: {0}")]
    Inference(String),
    #[error("failed to read {path:?}: {reason}")]
    Input { path: PathBuf, reason: String },
    #[error("failed to write {path:?}: {reason}")]
    Output { path: PathBuf, reason: String },
}

impl SynthError {
    /// The bucket printed next to per-tile failures.
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingConfig { .. } | Self::MalformedConfig { .. } | Self::WeightsLoad { .. } => {
                "configuration"
            }
            Self::Input { .. } => "input",
            Self::ClassCountMismatch { .. } | Self::DimensionMismatch { .. } => "dimension",
            Self::Inference(_) => "inference",
            Self::Output { .. } => "output",
        }
    }

    /// Whether the error must stop the whole batch.
    pub fn is_fatal(&self) -> bool {
        self.category() == "configuration"
    }

    pub(crate) fn input<P, E>(path: P, err: E) -> Self
    where
        P: AsRef<Path>,
        E: Display,
    {
        Self::Input {
            path: path.as_ref().to_owned(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn output<P, E>(path: P, err: E) -> Self
    where
        P: AsRef<Path>,
        E: Display,
    {
        Self::Output {
            path: path.as_ref().to_owned(),
            reason: err.to_string(),
        }
    }
}
