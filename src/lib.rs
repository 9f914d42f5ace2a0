//! # medseq: clinical event sequences for transformer models
//!
//! medseq turns longitudinal patient event tables into labeled, encoded
//! training instances without leaking future information into predictors.
//!
//! ## Features
//!
//! - Windowing of patient histories into prediction times with binary outcomes
//! - Diagnosis code normalization and data-derived vocabularies
//! - `CLS`-prefixed, truncated and padded integer sequences
//! - BERT-style masking for pretraining
//! - Support for CSV and TSV event tables, optionally gzipped
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use medseq::batching::Task;
//! use medseq::config::PipelineConfig;
//! use medseq::data::loader::TableLoader;
//! use medseq::data::source::CsvEventSource;
//! use medseq::vocab::DiagnosisNormalizer;
//! use medseq::pipeline;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::new()
//!     .with_lookbehind_days(730)
//!     .with_lookahead_days(365);
//!
//! let loader = TableLoader::new();
//! let source = CsvEventSource::new(vec!["events.csv".into()], "birthdays.csv".into());
//! let prediction_times = pipeline::window_cohort(
//!     &source,
//!     &config,
//!     loader.load_timestamps("prediction_times.csv")?,
//!     loader.load_timestamps("outcomes.csv")?,
//! )?;
//!
//! let normalizer = DiagnosisNormalizer::new(loader.load_code_mapping("mapping.csv")?);
//! let encoder = pipeline::fit_encoder(&config, normalizer, &prediction_times)?;
//! let batches = pipeline::build_batches(&config, Task::Supervised, &encoder, &prediction_times)?;
//! # Ok(())
//! # }
//! ```

pub mod batching;
pub mod cli;
pub mod config;
pub mod data;
pub mod encoding;
pub mod error;
pub mod masking;
pub mod pipeline;
pub mod utils;
pub mod vocab;
pub mod windowing;

use burn_ndarray::NdArray;

/// Default backend type
pub type DefaultBackend = NdArray<f32>;

/// Re-export commonly used types
pub use batching::{BatchAssembler, Batches, Task};
pub use config::PipelineConfig;
pub use data::{Patient, PatientId, PatientSlice, TimeInterval};
pub use encoding::{EncodedBatch, SequenceEncoder};
pub use error::{MedseqError, Result};
pub use masking::MaskingPolicy;
pub use vocab::Vocabulary;
pub use windowing::{PredictionTime, WindowingEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - leakage-safe clinical sequence encoding",
        NAME, VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_info() {
        let info_str = info();
        assert!(info_str.contains("medseq"));
        assert!(info_str.contains(VERSION));
    }
}
