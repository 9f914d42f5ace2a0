//! Patient event histories and time-bounded views over them.

use crate::data::{PatientEvent, PatientId, StaticFeature, TemporalEvent};
use crate::error::{MedseqError, Result};
use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    /// Inclusive lower bound
    pub start: NaiveDateTime,
    /// Exclusive upper bound
    pub end: NaiveDateTime,
}

impl TimeInterval {
    /// Create an interval, rejecting `end < start`
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if end < start {
            return Err(MedseqError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// Interval of length `lookbehind` ending (exclusively) at `end`
    ///
    /// A lookbehind reaching past the earliest representable instant starts
    /// the interval there.
    pub fn ending_at(end: NaiveDateTime, lookbehind: Duration) -> Result<Self> {
        let start = end.checked_sub_signed(lookbehind).unwrap_or(NaiveDateTime::MIN);
        Self::new(start, end)
    }

    /// Whether `timestamp` lies in `[start, end)`
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// A patient and their raw event history
///
/// Events are only ever appended. Temporal events are sorted on read, so
/// insertion order never leaks into what callers observe beyond breaking
/// timestamp ties.
#[derive(Debug, Clone)]
pub struct Patient {
    patient_id: PatientId,
    date_of_birth: NaiveDateTime,
    events: Vec<PatientEvent>,
}

impl Patient {
    /// Create a patient with no events
    pub fn new(patient_id: impl Into<PatientId>, date_of_birth: NaiveDateTime) -> Self {
        Self {
            patient_id: patient_id.into(),
            date_of_birth,
            events: Vec::new(),
        }
    }

    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    pub fn date_of_birth(&self) -> NaiveDateTime {
        self.date_of_birth
    }

    /// Append events to the history
    pub fn add_events<I>(&mut self, events: I)
    where
        I: IntoIterator,
        I::Item: Into<PatientEvent>,
    {
        self.events.extend(events.into_iter().map(Into::into));
    }

    /// Append a single event
    pub fn add_event(&mut self, event: impl Into<PatientEvent>) {
        self.events.push(event.into());
    }

    /// Total number of stored events, temporal and static
    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    /// Temporal events in ascending timestamp order, ties in insertion order
    pub fn temporal_events(&self) -> Vec<&TemporalEvent> {
        let mut events: Vec<&TemporalEvent> = self
            .events
            .iter()
            .filter_map(|e| match e {
                PatientEvent::Temporal(t) => Some(t),
                PatientEvent::Static(_) => None,
            })
            .collect();
        // stable sort keeps insertion order for equal timestamps
        events.sort_by_key(|e| e.timestamp);
        events
    }

    /// Static features in insertion order
    pub fn static_features(&self) -> Vec<&StaticFeature> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PatientEvent::Static(s) => Some(s),
                PatientEvent::Temporal(_) => None,
            })
            .collect()
    }

    /// Snapshot of the temporal events inside `interval`, plus all static features
    pub fn slice(self: &Arc<Self>, interval: TimeInterval) -> PatientSlice {
        PatientSlice::new(Arc::clone(self), Some(interval))
    }

    /// Snapshot of the full history
    pub fn unfiltered_slice(self: &Arc<Self>) -> PatientSlice {
        PatientSlice::new(Arc::clone(self), None)
    }
}

/// Immutable, time-bounded view of a patient
///
/// The events are copied out of the patient when the slice is built, so a
/// slice never observes later changes to its parent.
#[derive(Debug, Clone)]
pub struct PatientSlice {
    patient: Arc<Patient>,
    interval: Option<TimeInterval>,
    temporal_events: Vec<TemporalEvent>,
    static_features: Vec<StaticFeature>,
}

impl PatientSlice {
    /// Build a slice; `None` keeps every temporal event
    pub fn new(patient: Arc<Patient>, interval: Option<TimeInterval>) -> Self {
        let temporal_events = patient
            .temporal_events()
            .into_iter()
            .filter(|e| interval.map_or(true, |i| i.contains(e.timestamp)))
            .cloned()
            .collect();
        let static_features = patient.static_features().into_iter().cloned().collect();

        Self {
            patient,
            interval,
            temporal_events,
            static_features,
        }
    }

    pub fn patient(&self) -> &Patient {
        &self.patient
    }

    pub fn patient_id(&self) -> &PatientId {
        self.patient.patient_id()
    }

    pub fn date_of_birth(&self) -> NaiveDateTime {
        self.patient.date_of_birth()
    }

    /// Interval the slice was cut with (`None` for an unfiltered slice)
    pub fn interval(&self) -> Option<TimeInterval> {
        self.interval
    }

    /// Temporal events in timestamp order
    pub fn temporal_events(&self) -> &[TemporalEvent] {
        &self.temporal_events
    }

    pub fn static_features(&self) -> &[StaticFeature] {
        &self.static_features
    }
}
