pub mod loader;
pub mod patient;
pub mod source;
pub mod unpack;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use patient::{Patient, PatientSlice, TimeInterval};

/// Source type used for diagnosis events
pub const DIAGNOSIS_SOURCE_TYPE: &str = "diagnosis";

/// Patient identifier as found in the raw tables
///
/// Raw tables key patients by either integers or strings. Numeric ids that
/// parse as `i64` are stored as [`PatientId::Int`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatientId {
    /// Integer identifier
    Int(i64),
    /// String identifier
    Text(String),
}

impl PatientId {
    /// Parse an identifier from a raw table cell
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(id) => PatientId::Int(id),
            Err(_) => PatientId::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientId::Int(id) => write!(f, "{}", id),
            PatientId::Text(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for PatientId {
    fn from(id: i64) -> Self {
        PatientId::Int(id)
    }
}

impl From<&str> for PatientId {
    fn from(id: &str) -> Self {
        PatientId::Text(id.to_string())
    }
}

impl From<String> for PatientId {
    fn from(id: String) -> Self {
        PatientId::Text(id)
    }
}

/// Value carried by a temporal event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Bool(bool),
    Float(f64),
    Text(String),
}

impl EventValue {
    /// Parse a raw table cell, trying bool, then float, then falling back to text
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" | "True" | "TRUE" => return EventValue::Bool(true),
            "false" | "False" | "FALSE" => return EventValue::Bool(false),
            _ => {}
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => EventValue::Float(v),
            _ => EventValue::Text(raw.to_string()),
        }
    }

    /// Text payload, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for EventValue {
    fn from(v: f64) -> Self {
        EventValue::Float(v)
    }
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self {
        EventValue::Bool(v)
    }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        EventValue::Text(v.to_string())
    }
}

/// Value carried by a static feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticValue {
    Bool(bool),
    Float(f64),
    DateTime(NaiveDateTime),
    Text(String),
}

impl From<EventValue> for StaticValue {
    fn from(value: EventValue) -> Self {
        match value {
            EventValue::Bool(v) => StaticValue::Bool(v),
            EventValue::Float(v) => StaticValue::Float(v),
            EventValue::Text(v) => StaticValue::Text(v),
        }
    }
}

/// Timestamped fact about a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalEvent {
    /// When the event happened
    pub timestamp: NaiveDateTime,
    /// Kind of event, e.g. `diagnosis`
    pub source_type: String,
    /// Optional refinement of the kind, e.g. `A` for primary diagnoses
    pub source_subtype: Option<String>,
    /// Payload
    pub value: EventValue,
}

impl TemporalEvent {
    /// Create a new temporal event without subtype
    pub fn new(
        timestamp: NaiveDateTime,
        source_type: impl Into<String>,
        value: impl Into<EventValue>,
    ) -> Self {
        Self {
            timestamp,
            source_type: source_type.into(),
            source_subtype: None,
            value: value.into(),
        }
    }

    /// Set the source subtype
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.source_subtype = Some(subtype.into());
        self
    }
}

/// Time-invariant fact about a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticFeature {
    /// Kind of feature, e.g. `sex`
    pub source_type: String,
    /// Payload
    pub value: StaticValue,
}

impl StaticFeature {
    /// Create a new static feature
    pub fn new(source_type: impl Into<String>, value: StaticValue) -> Self {
        Self {
            source_type: source_type.into(),
            value,
        }
    }
}

/// Anything stored in a patient's event collection
#[derive(Debug, Clone, PartialEq)]
pub enum PatientEvent {
    Temporal(TemporalEvent),
    Static(StaticFeature),
}

impl From<TemporalEvent> for PatientEvent {
    fn from(event: TemporalEvent) -> Self {
        PatientEvent::Temporal(event)
    }
}

impl From<StaticFeature> for PatientEvent {
    fn from(feature: StaticFeature) -> Self {
        PatientEvent::Static(feature)
    }
}

/// One row of a raw event table
///
/// Rows without a timestamp describe static features.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    /// Patient the row belongs to
    pub patient_id: PatientId,
    /// Event time (absent for static features)
    pub timestamp: Option<NaiveDateTime>,
    /// Kind of event
    pub source_type: String,
    /// Optional subtype
    pub source_subtype: Option<String>,
    /// Payload
    pub value: EventValue,
}

impl EventRow {
    /// Convert the row into the event it describes
    pub fn into_event(self) -> PatientEvent {
        match self.timestamp {
            Some(timestamp) => PatientEvent::Temporal(TemporalEvent {
                timestamp,
                source_type: self.source_type,
                source_subtype: self.source_subtype,
                value: self.value,
            }),
            None => PatientEvent::Static(StaticFeature {
                source_type: self.source_type,
                value: self.value.into(),
            }),
        }
    }
}

/// One row of the date-of-birth table
#[derive(Debug, Clone, PartialEq)]
pub struct BirthdayRow {
    /// Patient
    pub patient_id: PatientId,
    /// Date of birth
    pub date_of_birth: NaiveDateTime,
}

/// One row of a flat `(patient_id, timestamp)` cohort table
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampRow {
    /// Patient
    pub patient_id: PatientId,
    /// Timestamp
    pub timestamp: NaiveDateTime,
}
