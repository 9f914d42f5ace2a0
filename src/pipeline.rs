//! End-to-end composition: patients → prediction times → vocabulary → batches.

use crate::batching::{BatchAssembler, Batches, Task};
use crate::config::PipelineConfig;
use crate::data::source::EventSource;
use crate::data::TimestampRow;
use crate::encoding::SequenceEncoder;
use crate::error::Result;
use crate::utils::random::seeded_rng;
use crate::vocab::DiagnosisNormalizer;
use crate::windowing::{create_prediction_times_for_cohort, group_timestamps, PredictionTime};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// Load every patient from `source` and window them at the given timestamps
pub fn window_cohort<S: EventSource + ?Sized>(
    source: &S,
    config: &PipelineConfig,
    prediction_rows: Vec<TimestampRow>,
    outcome_rows: Vec<TimestampRow>,
) -> anyhow::Result<Vec<PredictionTime>> {
    let engine = config.windowing_engine()?;
    let patients: Vec<_> = source.load_patients()?.into_iter().map(Arc::new).collect();
    info!("Loaded {} patients", patients.len());

    let prediction_timestamps = group_timestamps(prediction_rows);
    let outcome_timestamps = group_timestamps(outcome_rows);

    create_prediction_times_for_cohort(&engine, &patients, &prediction_timestamps, &outcome_timestamps)
        .context("Failed to create prediction times")
}

/// Encoder with a vocabulary fitted on `prediction_times`
pub fn fit_encoder(
    config: &PipelineConfig,
    normalizer: DiagnosisNormalizer,
    prediction_times: &[PredictionTime],
) -> Result<SequenceEncoder> {
    let mut encoder = config.sequence_encoder(normalizer)?;
    encoder.fit(prediction_times.iter().map(PredictionTime::patient_slice))?;
    Ok(encoder)
}

/// Batches for `task`, masking with an RNG seeded from the configuration
pub fn build_batches(
    config: &PipelineConfig,
    task: Task,
    encoder: &SequenceEncoder,
    prediction_times: &[PredictionTime],
) -> Result<Batches> {
    let assembler = BatchAssembler::new(encoder, config.batch_size)?;
    let policy = match task {
        Task::Pretraining => Some(config.masking_policy(encoder.vocabulary()?)?),
        Task::Supervised => None,
    };
    let mut rng = seeded_rng(config.seed);
    assembler.assemble(task, prediction_times, policy.as_ref(), &mut rng)
}
