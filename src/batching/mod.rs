//! Assembly of prediction times into model-ready batches.

use crate::encoding::tensors::{int_matrix, int_vector};
use crate::encoding::{BatchTensors, EncodedBatch, SequenceEncoder};
use crate::error::{MedseqError, Result};
use crate::masking::MaskingPolicy;
use crate::utils::{collections, format_number, percentage};
use crate::windowing::PredictionTime;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Training objective the batches are built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Masked diagnosis prediction
    Pretraining,
    /// Outcome classification
    Supervised,
}

/// Inputs with binary outcomes, one per row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedBatch {
    pub inputs: EncodedBatch,
    pub outcome: Vec<i64>,
    pub pred_time_uuids: Vec<String>,
}

/// Inputs with corrupted diagnoses and their reconstruction targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainingBatch {
    pub inputs: EncodedBatch,
    /// Row-major like `inputs`; `-1` where no prediction is made
    pub labels: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct SupervisedTensors<B: Backend> {
    pub inputs: BatchTensors<B>,
    pub outcome: Tensor<B, 1, Int>,
}

#[derive(Debug, Clone)]
pub struct PretrainingTensors<B: Backend> {
    pub inputs: BatchTensors<B>,
    pub labels: Tensor<B, 2, Int>,
}

impl SupervisedBatch {
    pub fn len(&self) -> usize {
        self.inputs.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.batch_size == 0
    }

    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> Result<SupervisedTensors<B>> {
        Ok(SupervisedTensors {
            inputs: self.inputs.to_tensors(device)?,
            outcome: int_vector(&self.outcome, device),
        })
    }
}

impl PretrainingBatch {
    pub fn len(&self) -> usize {
        self.inputs.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.batch_size == 0
    }

    /// Number of positions carrying a target
    pub fn n_targets(&self) -> usize {
        self.labels.iter().filter(|&&l| l != crate::masking::IGNORE_INDEX).count()
    }

    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> Result<PretrainingTensors<B>> {
        Ok(PretrainingTensors {
            inputs: self.inputs.to_tensors(device)?,
            labels: int_matrix(&self.labels, self.inputs.shape(), device)?,
        })
    }
}

/// Batches for either task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batches {
    Supervised(Vec<SupervisedBatch>),
    Pretraining(Vec<PretrainingBatch>),
}

impl Batches {
    pub fn task(&self) -> Task {
        match self {
            Batches::Supervised(_) => Task::Supervised,
            Batches::Pretraining(_) => Task::Pretraining,
        }
    }

    pub fn n_batches(&self) -> usize {
        match self {
            Batches::Supervised(b) => b.len(),
            Batches::Pretraining(b) => b.len(),
        }
    }

    /// Total number of rows over all batches
    pub fn n_rows(&self) -> usize {
        match self {
            Batches::Supervised(b) => b.iter().map(SupervisedBatch::len).sum(),
            Batches::Pretraining(b) => b.iter().map(PretrainingBatch::len).sum(),
        }
    }
}

/// Groups prediction times into fixed-size encoded batches
pub struct BatchAssembler<'a> {
    encoder: &'a SequenceEncoder,
    batch_size: usize,
}

impl<'a> BatchAssembler<'a> {
    pub fn new(encoder: &'a SequenceEncoder, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(MedseqError::InvalidConfig("batch_size must be positive".to_string()));
        }
        encoder.vocabulary()?;
        Ok(Self { encoder, batch_size })
    }

    /// Prediction times whose slice has at least one qualifying event
    ///
    /// Slices left with only `CLS` carry no signal and are dropped.
    pub fn retain_encodable<'p>(&self, prediction_times: &'p [PredictionTime]) -> Vec<&'p PredictionTime> {
        let kept: Vec<&PredictionTime> = prediction_times
            .iter()
            .filter(|pt| self.encoder.has_qualifying_events(pt.patient_slice()))
            .collect();

        let n_dropped = prediction_times.len() - kept.len();
        if n_dropped > 0 {
            warn!(
                "Dropped {} of {} prediction times ({:.2}%) with no qualifying events",
                format_number(n_dropped),
                format_number(prediction_times.len()),
                percentage(n_dropped, prediction_times.len())
            );
        }
        kept
    }

    pub fn supervised(&self, prediction_times: &[PredictionTime]) -> Result<Vec<SupervisedBatch>> {
        let kept = self.retain_encodable(prediction_times);

        let batches = collections::chunk(&kept, self.batch_size)
            .into_iter()
            .map(|chunk| -> Result<SupervisedBatch> {
                Ok(SupervisedBatch {
                    inputs: self.encoder.collate(chunk.iter().map(|pt| pt.patient_slice()))?,
                    outcome: chunk.iter().map(|pt| i64::from(pt.outcome())).collect(),
                    pred_time_uuids: chunk.iter().map(|pt| pt.uuid()).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!("Assembled {} supervised batches from {} prediction times", batches.len(), kept.len());
        Ok(batches)
    }

    /// Batches with diagnoses corrupted by `policy`; draws come from `rng` in batch order
    pub fn pretraining<R: Rng + ?Sized>(
        &self,
        prediction_times: &[PredictionTime],
        policy: &MaskingPolicy,
        rng: &mut R,
    ) -> Result<Vec<PretrainingBatch>> {
        let kept = self.retain_encodable(prediction_times);

        let mut batches = Vec::with_capacity(kept.len().div_ceil(self.batch_size));
        for chunk in collections::chunk(&kept, self.batch_size) {
            let mut inputs = self.encoder.collate(chunk.iter().map(|pt| pt.patient_slice()))?;
            let masked = policy.apply(&inputs.diagnosis, &inputs.is_padding, rng)?;
            inputs.diagnosis = masked.corrupted;
            batches.push(PretrainingBatch {
                inputs,
                labels: masked.labels,
            });
        }

        info!("Assembled {} pretraining batches from {} prediction times", batches.len(), kept.len());
        Ok(batches)
    }

    /// Batches for `task`; pretraining needs a masking policy
    pub fn assemble<R: Rng + ?Sized>(
        &self,
        task: Task,
        prediction_times: &[PredictionTime],
        policy: Option<&MaskingPolicy>,
        rng: &mut R,
    ) -> Result<Batches> {
        match task {
            Task::Supervised => self.supervised(prediction_times).map(Batches::Supervised),
            Task::Pretraining => {
                let policy = policy.ok_or_else(|| {
                    MedseqError::InvalidConfig("pretraining requires a masking policy".to_string())
                })?;
                self.pretraining(prediction_times, policy, rng).map(Batches::Pretraining)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Patient, TemporalEvent};
    use crate::encoding::PADDING;
    use crate::masking::IGNORE_INDEX;
    use crate::utils::random::seeded_rng;
    use crate::vocab::{DiagnosisExtractor, DiagnosisNormalizer, EventFilter};
    use crate::windowing::WindowingEngine;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Arc;

    type TestBackend = crate::DefaultBackend;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn patient(id: i64, codes: &[(&str, NaiveDateTime)]) -> Arc<Patient> {
        let mut patient = Patient::new(id, ts(1980, 1, 1));
        patient.add_events(
            codes
                .iter()
                .map(|(code, at)| TemporalEvent::new(*at, "diagnosis", *code)),
        );
        Arc::new(patient)
    }

    /// Three prediction times for patient 1 and one empty one for patient 2
    fn prediction_times() -> Vec<PredictionTime> {
        let engine = WindowingEngine::from_days(3650, 30).unwrap();
        let p1 = patient(1, &[("F32", ts(2020, 1, 1)), ("F30", ts(2020, 2, 1)), ("F32", ts(2020, 3, 1))]);
        let p2 = patient(2, &[("F32", ts(2021, 1, 1))]);

        let mut times = engine
            .create_prediction_times(
                &p1,
                &[ts(2020, 1, 15), ts(2020, 2, 15), ts(2020, 3, 15)],
                Some(ts(2020, 4, 1)),
            )
            .unwrap();
        times.extend(engine.create_prediction_times(&p2, &[ts(2020, 6, 1)], None).unwrap());
        times
    }

    fn encoder() -> SequenceEncoder {
        let extractor = DiagnosisExtractor::new(
            EventFilter::diagnoses(),
            DiagnosisNormalizer::from_pairs([("F30", "Bipolar"), ("F32", "Depression")]),
        );
        let mut encoder = SequenceEncoder::new(extractor, 8, true).unwrap();
        let times = prediction_times();
        encoder.fit(times.iter().map(|pt| pt.patient_slice())).unwrap();
        encoder
    }

    #[test]
    fn test_empty_slices_dropped() {
        let encoder = encoder();
        let assembler = BatchAssembler::new(&encoder, 2).unwrap();
        let times = prediction_times();

        let kept = assembler.retain_encodable(&times);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|pt| pt.patient_id().to_string() == "1"));
    }

    #[test]
    fn test_supervised_batches() {
        let encoder = encoder();
        let assembler = BatchAssembler::new(&encoder, 2).unwrap();

        let batches = assembler.supervised(&prediction_times()).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
        // 2020-03-15 is within 30 days of the outcome, the earlier two are not
        assert_eq!(batches[0].outcome, vec![0, 0]);
        assert_eq!(batches[1].outcome, vec![1]);
        assert_eq!(batches[0].pred_time_uuids[0], "1-2020-01-15-00-00-00");
        // CLS plus one and two events
        assert_eq!(batches[0].inputs.shape(), [2, 3]);
        assert_eq!(batches[1].inputs.shape(), [1, 4]);
    }

    #[test]
    fn test_pretraining_padding_corrupted_but_untargeted() {
        let encoder = encoder();
        let assembler = BatchAssembler::new(&encoder, 4).unwrap();
        let vocab = encoder.vocabulary().unwrap();
        let policy = MaskingPolicy::new(
            1.0,
            1.0,
            0.0,
            vocab.diagnosis_mask().unwrap(),
            vocab.diagnosis().len(),
        )
        .unwrap();

        let batches = assembler
            .pretraining(&prediction_times(), &policy, &mut seeded_rng(0))
            .unwrap();

        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert!(batch.inputs.diagnosis.iter().all(|&t| t == policy.mask_id()));
        for (i, &pad) in batch.inputs.is_padding.iter().enumerate() {
            if pad == PADDING {
                assert_eq!(batch.labels[i], IGNORE_INDEX);
            } else {
                assert_ne!(batch.labels[i], IGNORE_INDEX);
            }
        }
        assert_eq!(batch.n_targets(), 2 + 3 + 4);
    }

    #[test]
    fn test_assemble_requires_policy_for_pretraining() {
        let encoder = encoder();
        let assembler = BatchAssembler::new(&encoder, 4).unwrap();

        let result = assembler.assemble(Task::Pretraining, &prediction_times(), None, &mut seeded_rng(0));
        assert!(matches!(result, Err(MedseqError::InvalidConfig(_))));

        let batches = assembler
            .assemble(Task::Supervised, &prediction_times(), None, &mut seeded_rng(0))
            .unwrap();
        assert_eq!(batches.task(), Task::Supervised);
        assert_eq!(batches.n_rows(), 3);
    }

    #[test]
    fn test_unfitted_encoder_rejected() {
        let encoder = SequenceEncoder::new(DiagnosisExtractor::default(), 8, false).unwrap();
        assert!(matches!(BatchAssembler::new(&encoder, 4), Err(MedseqError::NotFitted)));
    }

    #[test]
    fn test_to_tensors() {
        let encoder = encoder();
        let assembler = BatchAssembler::new(&encoder, 4).unwrap();
        let batches = assembler.supervised(&prediction_times()).unwrap();
        let device = Default::default();

        let tensors = batches[0].to_tensors::<TestBackend>(&device).unwrap();

        assert_eq!(tensors.inputs.diagnosis.dims(), [3, 4]);
        assert_eq!(tensors.outcome.dims(), [3]);
        let outcome = tensors.outcome.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(outcome, vec![0, 0, 1]);
    }
}
