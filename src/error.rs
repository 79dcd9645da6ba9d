//! Error taxonomy for the reconciliation and life table pipeline

use thiserror::Error;

use crate::records::{CohortKey, Gender};

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while loading, reconciling, or building life tables
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A raw row failed schema validation (non-numeric count, negative value)
    #[error("malformed input at {context}: {reason}")]
    MalformedInput { context: String, reason: String },

    /// Competing population records tie on both type priority and date
    #[error(
        "ambiguous records for {key}: {count} rows share type {record_type} and date {record_date}"
    )]
    AmbiguousRecord {
        key: CohortKey,
        count: usize,
        record_type: String,
        record_date: String,
    },

    /// Aggregated totals diverge from input totals
    #[error("conservation violated for {measure}: input {expected}, output {actual}")]
    Conservation {
        measure: &'static str,
        expected: f64,
        actual: f64,
    },

    /// A ratio with a zero denominator where the result is required
    #[error("division by zero: {context}")]
    DivisionByZero { context: String },

    /// Probability of death outside [0, 1] supplied to the builder
    #[error("invalid probability qx={qx} at age {age} ({year}, {gender})")]
    InvalidProbability {
        year: i32,
        gender: Gender,
        age: u32,
        qx: f64,
    },

    /// Central rate that is negative or not finite
    #[error("invalid mortality rate mx={mx} at age {age} ({year}, {gender})")]
    InvalidRate {
        year: i32,
        gender: Gender,
        age: u32,
        mx: f64,
    },

    /// Age sequence does not start at zero or skips an integer age
    #[error("age sequence for ({year}, {gender}) expected age {expected}, found {found}")]
    AgeGap {
        year: i32,
        gender: Gender,
        expected: u32,
        found: u32,
    },

    /// Radix that is zero, negative or not finite
    #[error("life table radix must be positive and finite, got {radix}")]
    InvalidRadix { radix: f64 },

    /// Builder was given no rows
    #[error("empty age sequence for ({year}, {gender})")]
    EmptySequence { year: i32, gender: Gender },

    /// A required column is absent from an input file header
    #[error("required column '{column}' not found in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the error compromises only a single (year, gender) partition
    ///
    /// Partition-local errors may be isolated when the caller opts in;
    /// everything else always aborts the run.
    pub fn is_partition_local(&self) -> bool {
        matches!(
            self,
            PipelineError::DivisionByZero { .. }
                | PipelineError::InvalidProbability { .. }
                | PipelineError::InvalidRate { .. }
                | PipelineError::AgeGap { .. }
                | PipelineError::EmptySequence { .. }
        )
    }
}
