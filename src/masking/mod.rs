//! Masked-language-model corruption of diagnosis sequences.
//!
//! Each position is a masking candidate with probability `masking_prob`.
//! Candidates are replaced by `MASK`, by a random diagnosis id, or left
//! unchanged, in proportions `replace_with_mask_prob`,
//! `replace_with_random_prob` and the remainder. Only candidates carry a
//! label; padding never does.

use crate::encoding::PADDING;
use crate::error::{MedseqError, Result};
use crate::utils::validation;
use rand::Rng;
use tracing::warn;

/// Label of positions that do not contribute to the loss
pub const IGNORE_INDEX: i64 = -1;

/// Label forced at `(0, 0)` when a batch would have no targets at all
pub const DEGENERATE_BATCH_LABEL: i64 = 1;

/// Corrupted inputs and their targets, row-major like the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedBatch {
    pub corrupted: Vec<i64>,
    pub labels: Vec<i64>,
}

/// BERT-style 80/10/10 corruption
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskingPolicy {
    masking_prob: f64,
    replace_with_mask_prob: f64,
    replace_with_random_prob: f64,
    mask_id: i64,
    n_diagnosis_codes: usize,
}

impl MaskingPolicy {
    /// Create a policy with validated probabilities
    ///
    /// `n_diagnosis_codes` is the size of the diagnosis vocabulary; random
    /// replacements are drawn from `[0, n_diagnosis_codes - 1)`.
    pub fn new(
        masking_prob: f64,
        replace_with_mask_prob: f64,
        replace_with_random_prob: f64,
        mask_id: i64,
        n_diagnosis_codes: usize,
    ) -> Result<Self> {
        let in_unit = |value: f64, name: &str| {
            validation::in_range(value, 0.0, 1.0, name)
                .map_err(|e| MedseqError::InvalidConfig(e.to_string()))
        };
        in_unit(masking_prob, "masking_prob")?;
        in_unit(replace_with_mask_prob, "replace_with_mask_prob")?;
        in_unit(replace_with_random_prob, "replace_with_random_prob")?;
        if replace_with_mask_prob + replace_with_random_prob > 1.0 {
            return Err(MedseqError::InvalidConfig(format!(
                "replace_with_mask_prob + replace_with_random_prob must not exceed 1, got {}",
                replace_with_mask_prob + replace_with_random_prob
            )));
        }
        if n_diagnosis_codes < 2 {
            return Err(MedseqError::InvalidConfig(format!(
                "random replacement needs at least 2 diagnosis codes, got {}",
                n_diagnosis_codes
            )));
        }

        Ok(Self {
            masking_prob,
            replace_with_mask_prob,
            replace_with_random_prob,
            mask_id,
            n_diagnosis_codes,
        })
    }

    pub fn masking_prob(&self) -> f64 {
        self.masking_prob
    }

    pub fn mask_id(&self) -> i64 {
        self.mask_id
    }

    /// Corrupt a `(batch_size, seq_len)` diagnosis buffer
    ///
    /// Every position, padding included, goes through the same corruption,
    /// so the random stream depends only on the batch shape and contents.
    /// Padding positions are always labelled [`IGNORE_INDEX`].
    pub fn apply<R: Rng + ?Sized>(
        &self,
        diagnosis: &[i64],
        is_padding: &[i64],
        rng: &mut R,
    ) -> Result<MaskedBatch> {
        if diagnosis.len() != is_padding.len() {
            return Err(MedseqError::ShapeMismatch {
                expected: diagnosis.len(),
                actual: is_padding.len(),
            });
        }

        let mut corrupted = diagnosis.to_vec();
        let mut labels = vec![IGNORE_INDEX; diagnosis.len()];

        for (i, &original) in diagnosis.iter().enumerate() {
            let p: f64 = rng.gen();
            if p >= self.masking_prob {
                continue;
            }

            let p = p / self.masking_prob;
            if p < self.replace_with_mask_prob {
                corrupted[i] = self.mask_id;
            } else if p < self.replace_with_mask_prob + self.replace_with_random_prob {
                corrupted[i] = rng.gen_range(0..self.n_diagnosis_codes as i64 - 1);
            }
            labels[i] = if is_padding[i] == PADDING { IGNORE_INDEX } else { original };
        }

        if !labels.is_empty() && labels.iter().all(|&l| l == IGNORE_INDEX) {
            warn!("Masking produced no targets, forcing a label at position (0, 0)");
            labels[0] = DEGENERATE_BATCH_LABEL;
        }

        Ok(MaskedBatch { corrupted, labels })
    }
}
