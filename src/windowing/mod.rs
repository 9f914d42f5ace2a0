//! Leakage-safe windowing of patient histories into labeled prediction times.
//!
//! For a prediction timestamp `t`, predictors come from `[t - lookbehind, t)`
//! and the label is positive iff the outcome happens at or before
//! `t + lookahead`. Events at exactly `t` are never predictors.

pub mod cohort;

use crate::data::{Patient, PatientId, PatientSlice, TimeInterval};
use crate::error::{MedseqError, Result};
use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;

pub use cohort::{create_prediction_times_for_cohort, group_timestamps, CohortTimestamps};

/// Layout of the timestamp part of a prediction-time identifier
const UUID_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// One labeled training instance
#[derive(Debug, Clone)]
pub struct PredictionTime {
    patient_slice: PatientSlice,
    prediction_timestamp: NaiveDateTime,
    outcome: bool,
}

impl PredictionTime {
    /// Predictor view of the patient
    pub fn patient_slice(&self) -> &PatientSlice {
        &self.patient_slice
    }

    pub fn prediction_timestamp(&self) -> NaiveDateTime {
        self.prediction_timestamp
    }

    /// Whether the outcome fell inside the lookahead horizon
    pub fn outcome(&self) -> bool {
        self.outcome
    }

    pub fn patient_id(&self) -> &PatientId {
        self.patient_slice.patient_id()
    }

    /// Identifier for joining predictions back onto source rows
    pub fn uuid(&self) -> String {
        format!(
            "{}-{}",
            self.patient_id(),
            self.prediction_timestamp.format(UUID_TIMESTAMP_FORMAT)
        )
    }
}

/// Builds prediction times for a fixed lookbehind and lookahead
#[derive(Debug, Clone, Copy)]
pub struct WindowingEngine {
    lookbehind: Duration,
    lookahead: Duration,
}

impl WindowingEngine {
    /// Create an engine; negative durations are rejected
    pub fn new(lookbehind: Duration, lookahead: Duration) -> Result<Self> {
        if lookbehind < Duration::zero() {
            return Err(MedseqError::InvalidConfig(format!(
                "lookbehind must be non-negative, got {}",
                lookbehind
            )));
        }
        if lookahead < Duration::zero() {
            return Err(MedseqError::InvalidConfig(format!(
                "lookahead must be non-negative, got {}",
                lookahead
            )));
        }
        Ok(Self {
            lookbehind,
            lookahead,
        })
    }

    /// Engine with durations given in whole days
    pub fn from_days(lookbehind_days: i64, lookahead_days: i64) -> Result<Self> {
        let days = |n: i64, name: &str| {
            Duration::try_days(n).ok_or_else(|| {
                MedseqError::InvalidConfig(format!("{} of {} days is out of range", name, n))
            })
        };
        Self::new(days(lookbehind_days, "lookbehind")?, days(lookahead_days, "lookahead")?)
    }

    pub fn lookbehind(&self) -> Duration {
        self.lookbehind
    }

    pub fn lookahead(&self) -> Duration {
        self.lookahead
    }

    /// One prediction time per timestamp, in input order
    ///
    /// Duplicated timestamps yield duplicated prediction times; nothing is
    /// sorted or dropped.
    pub fn create_prediction_times(
        &self,
        patient: &Arc<Patient>,
        prediction_timestamps: &[NaiveDateTime],
        outcome_timestamp: Option<NaiveDateTime>,
    ) -> Result<Vec<PredictionTime>> {
        prediction_timestamps
            .iter()
            .map(|&prediction_timestamp| -> Result<PredictionTime> {
                let interval = TimeInterval::ending_at(prediction_timestamp, self.lookbehind)?;
                Ok(PredictionTime {
                    patient_slice: patient.slice(interval),
                    prediction_timestamp,
                    outcome: self.outcome_within_horizon(prediction_timestamp, outcome_timestamp),
                })
            })
            .collect()
    }

    fn outcome_within_horizon(
        &self,
        prediction_timestamp: NaiveDateTime,
        outcome_timestamp: Option<NaiveDateTime>,
    ) -> bool {
        // a horizon past the last representable instant covers every outcome
        outcome_timestamp.map_or(false, |outcome| {
            prediction_timestamp
                .checked_add_signed(self.lookahead)
                .map_or(true, |horizon| outcome <= horizon)
        })
    }
}

/// Convenience wrapper building a [`WindowingEngine`] for a single call
pub fn create_prediction_times(
    patient: &Arc<Patient>,
    prediction_timestamps: &[NaiveDateTime],
    lookbehind: Duration,
    lookahead: Duration,
    outcome_timestamp: Option<NaiveDateTime>,
) -> Result<Vec<PredictionTime>> {
    WindowingEngine::new(lookbehind, lookahead)?.create_prediction_times(
        patient,
        prediction_timestamps,
        outcome_timestamp,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{StaticFeature, StaticValue, TemporalEvent};
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn two_event_patient() -> Arc<Patient> {
        let mut patient = Patient::new(1i64, ts(1990, 1, 1));
        patient.add_event(TemporalEvent::new(ts(2021, 1, 1), "test", 1.0));
        patient.add_event(TemporalEvent::new(ts(2021, 1, 3), "test", 2.0));
        patient.add_event(StaticFeature::new("sex", StaticValue::Text("F".to_string())));
        Arc::new(patient)
    }

    #[test]
    fn test_two_prediction_times_scenario() {
        let patient = two_event_patient();
        let times = create_prediction_times(
            &patient,
            &[ts(2021, 1, 2), ts(2021, 1, 4)],
            Duration::days(2),
            Duration::days(2),
            Some(ts(2021, 1, 5)),
        )
        .unwrap();

        assert_eq!(times.len(), 2);

        let first = times[0].patient_slice().temporal_events();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].timestamp, ts(2021, 1, 1));
        assert!(!times[0].outcome());

        let second = times[1].patient_slice().temporal_events();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].timestamp, ts(2021, 1, 3));
        assert!(times[1].outcome());

        assert_eq!(times[1].patient_slice().static_features().len(), 1);
    }

    #[test]
    fn test_interval_edges() {
        let patient = two_event_patient();
        let engine = WindowingEngine::from_days(2, 0).unwrap();

        // an event at exactly the prediction timestamp is excluded
        let at_end = engine.create_prediction_times(&patient, &[ts(2021, 1, 3)], None).unwrap();
        let events = at_end[0].patient_slice().temporal_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, ts(2021, 1, 1));

        // an event at exactly the window start is included
        let at_start = engine.create_prediction_times(&patient, &[ts(2021, 1, 5)], None).unwrap();
        let events = at_start[0].patient_slice().temporal_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, ts(2021, 1, 3));
    }

    #[test]
    fn test_no_event_at_or_after_prediction_time() {
        let mut patient = Patient::new(1i64, ts(1990, 1, 1));
        for day in 1..=28 {
            patient.add_event(TemporalEvent::new(ts(2021, 2, day), "test", day as f64));
        }
        let patient = Arc::new(patient);
        let engine = WindowingEngine::from_days(365, 30).unwrap();
        let stamps: Vec<NaiveDateTime> = (1..=28).map(|d| ts(2021, 2, d)).collect();

        for time in engine.create_prediction_times(&patient, &stamps, None).unwrap() {
            assert!(time
                .patient_slice()
                .temporal_events()
                .iter()
                .all(|e| e.timestamp < time.prediction_timestamp()));
        }
    }

    #[test]
    fn test_outcome_label_boundaries() {
        let patient = two_event_patient();
        let engine = WindowingEngine::from_days(10, 2).unwrap();
        let stamp = [ts(2021, 1, 4)];

        let on_horizon = engine.create_prediction_times(&patient, &stamp, Some(ts(2021, 1, 6))).unwrap();
        assert!(on_horizon[0].outcome());

        let past_horizon = engine.create_prediction_times(&patient, &stamp, Some(ts(2021, 1, 7))).unwrap();
        assert!(!past_horizon[0].outcome());

        let earlier = engine.create_prediction_times(&patient, &stamp, Some(ts(2020, 12, 1))).unwrap();
        assert!(earlier[0].outcome());

        let missing = engine.create_prediction_times(&patient, &stamp, None).unwrap();
        assert!(!missing[0].outcome());
    }

    #[test]
    fn test_duplicates_and_order_preserved() {
        let patient = two_event_patient();
        let engine = WindowingEngine::from_days(2, 2).unwrap();
        let stamps = [ts(2021, 1, 4), ts(2021, 1, 2), ts(2021, 1, 4)];

        let times = engine.create_prediction_times(&patient, &stamps, None).unwrap();
        let got: Vec<NaiveDateTime> = times.iter().map(|t| t.prediction_timestamp()).collect();
        assert_eq!(got, stamps.to_vec());
    }

    #[test]
    fn test_lookbehind_before_all_data() {
        let patient = two_event_patient();
        let engine = WindowingEngine::from_days(3650, 0).unwrap();
        let times = engine.create_prediction_times(&patient, &[ts(2000, 1, 1)], None).unwrap();

        assert!(times[0].patient_slice().temporal_events().is_empty());
    }

    #[test]
    fn test_negative_durations_rejected() {
        assert!(matches!(
            WindowingEngine::from_days(-1, 0),
            Err(MedseqError::InvalidConfig(_))
        ));
        assert!(matches!(
            WindowingEngine::from_days(0, -1),
            Err(MedseqError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_huge_durations_do_not_panic() {
        let patient = two_event_patient();

        let engine = WindowingEngine::from_days(10, 200_000_000).unwrap();
        let times = engine
            .create_prediction_times(&patient, &[ts(2021, 1, 1)], Some(ts(2400, 1, 1)))
            .unwrap();
        assert!(times[0].outcome());

        let engine = WindowingEngine::from_days(200_000_000, 0).unwrap();
        let times = engine.create_prediction_times(&patient, &[ts(2021, 1, 4)], None).unwrap();
        assert_eq!(times[0].patient_slice().temporal_events().len(), 2);

        assert!(matches!(
            WindowingEngine::from_days(i64::MAX / 2, 0),
            Err(MedseqError::InvalidConfig(_))
        ));
        assert!(matches!(
            WindowingEngine::from_days(0, i64::MAX / 2),
            Err(MedseqError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_uuid() {
        let patient = two_event_patient();
        let engine = WindowingEngine::from_days(2, 2).unwrap();
        let times = engine.create_prediction_times(&patient, &[ts(2021, 1, 4)], None).unwrap();

        assert_eq!(times[0].uuid(), "1-2021-01-04-00-00-00");
    }
}
