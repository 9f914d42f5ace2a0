//! Cohort-level windowing over many patients.

use crate::data::{Patient, PatientId, TimestampRow};
use crate::error::{MedseqError, Result};
use crate::windowing::{PredictionTime, WindowingEngine};
use chrono::NaiveDateTime;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Timestamps per patient, in row order
pub type CohortTimestamps = HashMap<PatientId, Vec<NaiveDateTime>>;

/// Group a flat `(patient_id, timestamp)` table by patient
pub fn group_timestamps(rows: impl IntoIterator<Item = TimestampRow>) -> CohortTimestamps {
    let mut grouped: CohortTimestamps = HashMap::new();
    for row in rows {
        grouped.entry(row.patient_id).or_default().push(row.timestamp);
    }
    grouped
}

/// Window every patient in the cohort and concatenate the results
///
/// Patients are processed in parallel; the output keeps cohort order, and
/// within a patient the order of its prediction timestamps. A patient without
/// an outcome entry has no outcome; only the first outcome timestamp of a
/// patient is used. Any data-integrity error fails the whole cohort.
pub fn create_prediction_times_for_cohort(
    engine: &WindowingEngine,
    patients: &[Arc<Patient>],
    prediction_timestamps: &CohortTimestamps,
    outcome_timestamps: &CohortTimestamps,
) -> Result<Vec<PredictionTime>> {
    let known: HashSet<&PatientId> = patients.iter().map(|p| p.patient_id()).collect();
    let mut unknown: Vec<&PatientId> = prediction_timestamps
        .keys()
        .filter(|id| !known.contains(id))
        .collect();
    unknown.sort();
    if let Some(patient_id) = unknown.first() {
        return Err(MedseqError::UnknownPatient {
            patient_id: (*patient_id).clone(),
        });
    }

    let per_patient: Vec<Vec<PredictionTime>> = patients
        .par_iter()
        .map(|patient| {
            let stamps = prediction_timestamps
                .get(patient.patient_id())
                .ok_or_else(|| MedseqError::MissingPredictionTimestamps {
                    patient_id: patient.patient_id().clone(),
                })?;
            let outcome = outcome_timestamps
                .get(patient.patient_id())
                .and_then(|outcomes| outcomes.first().copied());
            if outcome_timestamps
                .get(patient.patient_id())
                .map_or(false, |outcomes| outcomes.len() > 1)
            {
                debug!(
                    "Patient {} has several outcome timestamps, using the first",
                    patient.patient_id()
                );
            }
            engine.create_prediction_times(patient, stamps, outcome)
        })
        .collect::<Result<Vec<_>>>()?;

    let prediction_times: Vec<PredictionTime> = per_patient.into_iter().flatten().collect();
    let positives = prediction_times.iter().filter(|t| t.outcome()).count();
    info!(
        "Created {} prediction times for {} patients ({} positive)",
        prediction_times.len(),
        patients.len(),
        positives
    );

    Ok(prediction_times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TemporalEvent;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn cohort() -> Vec<Arc<Patient>> {
        (1i64..=3)
            .map(|id| {
                let mut patient = Patient::new(id, ts(1980, 1, 1));
                patient.add_event(TemporalEvent::new(ts(2021, 1, 1), "diagnosis", "F32"));
                Arc::new(patient)
            })
            .collect()
    }

    fn rows(pairs: &[(i64, NaiveDateTime)]) -> Vec<TimestampRow> {
        pairs
            .iter()
            .map(|&(id, timestamp)| TimestampRow { patient_id: PatientId::Int(id), timestamp })
            .collect()
    }

    #[test]
    fn test_group_timestamps_keeps_row_order() {
        let grouped = group_timestamps(rows(&[
            (1, ts(2021, 3, 1)),
            (2, ts(2021, 1, 1)),
            (1, ts(2021, 2, 1)),
        ]));

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&PatientId::Int(1)], vec![ts(2021, 3, 1), ts(2021, 2, 1)]);
    }

    #[test]
    fn test_cohort_concatenates_in_patient_order() {
        let engine = WindowingEngine::from_days(365, 30).unwrap();
        let predictions = group_timestamps(rows(&[
            (3, ts(2021, 6, 1)),
            (1, ts(2021, 6, 1)),
            (2, ts(2021, 6, 1)),
            (1, ts(2021, 7, 1)),
        ]));
        let outcomes = group_timestamps(rows(&[(2, ts(2021, 6, 15)), (2, ts(2020, 1, 1))]));

        let times =
            create_prediction_times_for_cohort(&engine, &cohort(), &predictions, &outcomes).unwrap();

        let ids: Vec<String> = times.iter().map(|t| t.patient_id().to_string()).collect();
        assert_eq!(ids, vec!["1", "1", "2", "3"]);
        let outcomes: Vec<bool> = times.iter().map(|t| t.outcome()).collect();
        assert_eq!(outcomes, vec![false, false, true, false]);
    }

    #[test]
    fn test_missing_prediction_timestamps_fails() {
        let engine = WindowingEngine::from_days(365, 30).unwrap();
        let predictions = group_timestamps(rows(&[(1, ts(2021, 6, 1)), (2, ts(2021, 6, 1))]));

        let err = create_prediction_times_for_cohort(&engine, &cohort(), &predictions, &HashMap::new())
            .unwrap_err();
        assert_eq!(
            err,
            MedseqError::MissingPredictionTimestamps { patient_id: PatientId::Int(3) }
        );
    }

    #[test]
    fn test_unknown_patient_fails() {
        let engine = WindowingEngine::from_days(365, 30).unwrap();
        let predictions = group_timestamps(rows(&[
            (1, ts(2021, 6, 1)),
            (2, ts(2021, 6, 1)),
            (3, ts(2021, 6, 1)),
            (4, ts(2021, 6, 1)),
        ]));

        let err = create_prediction_times_for_cohort(&engine, &cohort(), &predictions, &HashMap::new())
            .unwrap_err();
        assert_eq!(err, MedseqError::UnknownPatient { patient_id: PatientId::Int(4) });
    }
}
