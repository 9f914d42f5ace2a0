//! Error types for windowing and sequence encoding.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::data::PatientId;

/// Errors raised by the core pipeline.
///
/// Configuration, data-integrity and not-ready errors are all fatal: they
/// propagate to the caller and abort the pass for the whole cohort.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MedseqError {
    /// A configuration value is out of its valid range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Interval end precedes its start.
    #[error("Invalid time interval: start {start} is after end {end}")]
    InvalidInterval {
        /// Interval start
        start: NaiveDateTime,
        /// Interval end
        end: NaiveDateTime,
    },

    /// An event row references a patient with no date of birth.
    #[error("Missing date of birth for patient {patient_id}")]
    MissingDateOfBirth {
        /// Offending patient
        patient_id: PatientId,
    },

    /// A cohort patient has no reference prediction timestamps.
    #[error("Missing prediction timestamps for patient {patient_id}")]
    MissingPredictionTimestamps {
        /// Offending patient
        patient_id: PatientId,
    },

    /// Prediction timestamps were requested for a patient outside the cohort.
    #[error("Prediction timestamps requested for unknown patient {patient_id}")]
    UnknownPatient {
        /// Offending patient
        patient_id: PatientId,
    },

    /// Encoding was attempted before the vocabulary was fitted.
    #[error("Vocabulary has not been fitted; call fit() before encode() or collate()")]
    NotFitted,

    /// Two buffers that must share a shape do not.
    #[error("Shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Expected element count
        expected: usize,
        /// Actual element count
        actual: usize,
    },
}

/// Result alias for the core pipeline.
pub type Result<T> = std::result::Result<T, MedseqError>;
