//! Pipeline configuration shared by windowing, encoding and masking.

use crate::data::loader::LoaderConfig;
use crate::data::DIAGNOSIS_SOURCE_TYPE;
use crate::error::MedseqError;
use crate::masking::MaskingPolicy;
use crate::utils::validation;
use crate::vocab::{DiagnosisExtractor, DiagnosisNormalizer, EventFilter, Vocabulary};
use crate::windowing::WindowingEngine;
use crate::encoding::SequenceEncoder;
use burn::prelude::*;

/// Windowing, vocabulary and masking parameters
#[derive(Config, Debug)]
pub struct PipelineConfig {
    /// Days of history visible before each prediction time
    #[config(default = "365")]
    pub lookbehind_days: i64,

    /// Days after a prediction time in which an outcome counts as positive
    #[config(default = "365")]
    pub lookahead_days: i64,

    /// Maximum number of elements per sequence, `CLS` included
    #[config(default = "256")]
    pub max_sequence_length: usize,

    /// Probability that a position becomes a masking candidate
    #[config(default = "0.15")]
    pub masking_prob: f64,

    /// Share of candidates replaced by `MASK`
    #[config(default = "0.8")]
    pub replace_with_mask_prob: f64,

    /// Share of candidates replaced by a random diagnosis
    #[config(default = "0.1")]
    pub replace_with_random_prob: f64,

    /// Reserve a `MASK` diagnosis id
    #[config(default = "true")]
    pub add_mask_token: bool,

    #[config(default = "32")]
    pub batch_size: usize,

    #[config(default = "2026")]
    pub seed: u64,

    /// Event source type treated as diagnoses, `diagnosis` when unset
    pub diagnosis_source_type: Option<String>,

    /// Restrict diagnoses to one source subtype
    pub diagnosis_source_subtype: Option<String>,
}

impl PipelineConfig {
    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> crate::error::Result<()> {
        let check = |r: anyhow::Result<()>| r.map_err(|e| MedseqError::InvalidConfig(e.to_string()));

        check(validation::non_negative(self.lookbehind_days, "lookbehind_days"))?;
        check(validation::non_negative(self.lookahead_days, "lookahead_days"))?;
        check(validation::positive(self.max_sequence_length, "max_sequence_length"))?;
        check(validation::positive(self.batch_size, "batch_size"))?;
        check(validation::in_range(self.masking_prob, 0.0, 1.0, "masking_prob"))?;
        check(validation::in_range(self.replace_with_mask_prob, 0.0, 1.0, "replace_with_mask_prob"))?;
        check(validation::in_range(self.replace_with_random_prob, 0.0, 1.0, "replace_with_random_prob"))?;

        if self.replace_with_mask_prob + self.replace_with_random_prob > 1.0 {
            return Err(MedseqError::InvalidConfig(
                "replace_with_mask_prob + replace_with_random_prob must not exceed 1".to_string(),
            ));
        }
        self.windowing_engine()?;
        Ok(())
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = Self::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config from {:?}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn windowing_engine(&self) -> crate::error::Result<WindowingEngine> {
        WindowingEngine::from_days(self.lookbehind_days, self.lookahead_days)
    }

    /// Filter selecting diagnosis events
    pub fn event_filter(&self) -> EventFilter {
        EventFilter {
            source_type: self
                .diagnosis_source_type
                .clone()
                .unwrap_or_else(|| DIAGNOSIS_SOURCE_TYPE.to_string()),
            source_subtype: self.diagnosis_source_subtype.clone(),
        }
    }

    /// Loader options keeping diagnosis values as raw codes
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            text_source_types: vec![self.event_filter().source_type],
            ..LoaderConfig::default()
        }
    }

    /// Unfitted encoder using `normalizer` for diagnosis codes
    pub fn sequence_encoder(&self, normalizer: DiagnosisNormalizer) -> crate::error::Result<SequenceEncoder> {
        SequenceEncoder::new(
            DiagnosisExtractor::new(self.event_filter(), normalizer),
            self.max_sequence_length,
            self.add_mask_token,
        )
    }

    /// Masking policy bound to a fitted vocabulary
    ///
    /// Fails when the vocabulary was fitted without a `MASK` token.
    pub fn masking_policy(&self, vocabulary: &Vocabulary) -> crate::error::Result<MaskingPolicy> {
        let mask_id = vocabulary.diagnosis_mask().ok_or_else(|| {
            MedseqError::InvalidConfig("masking requires a vocabulary with a MASK token".to_string())
        })?;
        MaskingPolicy::new(
            self.masking_prob,
            self.replace_with_mask_prob,
            self.replace_with_random_prob,
            mask_id,
            vocabulary.diagnosis().len(),
        )
    }
}
