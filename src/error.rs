use std::fmt;

use thiserror::Error;

use crate::population::types::SegmentId;

pub type Result<T> = std::result::Result<T, WeError>;

/// A coordinate batch could not be classified. Always fatal for the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssignmentError {
    #[error("row {row}: coordinate {value} in dimension {dim} lies outside the bin edges")]
    OutOfBounds { row: usize, dim: usize, value: f64 },

    #[error("row {row}: {reason}")]
    Unclassifiable { row: usize, reason: String },

    #[error("coordinates have {got} dimensions, mapper expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("row {row}: mapper returned bin {index} but only {nbins} bins exist")]
    InvalidIndex {
        row: usize,
        index: usize,
        nbins: usize,
    },
}

impl AssignmentError {
    pub fn unclassifiable(row: usize, reason: impl Into<String>) -> Self {
        Self::Unclassifiable {
            row,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WeError {
    #[error("bin assignment failed: {0}")]
    Assignment(#[from] AssignmentError),

    #[error("invalid split: multiplicity {multiplicity} (need at least 2)")]
    InvalidSplit { multiplicity: usize },

    #[error("invalid merge: {reason}")]
    InvalidMerge { reason: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("propagation failed: {message}")]
    Propagation { message: String },

    #[error("consistency check failed: {message}")]
    Consistency { message: String },
}

impl WeError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn propagation(message: impl Into<String>) -> Self {
        Self::Propagation {
            message: message.into(),
        }
    }
}

/// Non-fatal conditions collected during one iteration of population control.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A walker still sits outside the absolute weight bounds after the
    /// threshold pass.
    ThresholdUnsatisfiable {
        bin: usize,
        segment: SegmentId,
        weight: f64,
        bound: f64,
    },
    /// Walkers reached a sink but no initial state was left to restart them.
    RecyclePoolExhausted { count: usize },
    /// A bin finished with a population different from its target.
    TargetCountMissed {
        bin: usize,
        target: usize,
        actual: usize,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThresholdUnsatisfiable {
                bin,
                segment,
                weight,
                bound,
            } => write!(
                f,
                "bin {bin}: walker {segment} has weight {weight:e} beyond bound {bound:e}; the threshold range is likely too small"
            ),
            Self::RecyclePoolExhausted { count } => {
                write!(f, "initial-state pool exhausted; {count} recycle requests unmet")
            }
            Self::TargetCountMissed {
                bin,
                target,
                actual,
            } => write!(f, "bin {bin}: {actual} walkers, target {target}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::warn!("{diagnostic}");
        self.entries.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Total unmet recycle requests reported this iteration.
    pub fn unmet_recycles(&self) -> usize {
        self.entries
            .iter()
            .map(|d| match d {
                Diagnostic::RecyclePoolExhausted { count } => *count,
                _ => 0,
            })
            .sum()
    }
}
