//! Where patients come from.
//!
//! A small closed set of sources is passed explicitly to the pipeline instead
//! of being looked up by name.

use crate::data::loader::{LoaderConfig, TableLoader};
use crate::data::unpack::unpack_patients;
use crate::data::{BirthdayRow, EventRow, Patient};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Provider of raw event and date-of-birth rows
pub trait EventSource {
    /// All event rows, across every configured event table
    fn event_rows(&self) -> Result<Vec<EventRow>>;

    /// The date-of-birth table
    fn birthday_rows(&self) -> Result<Vec<BirthdayRow>>;

    /// Unpack the rows into patients
    fn load_patients(&self) -> Result<Vec<Patient>> {
        let birthdays = self.birthday_rows()?;
        let events = self.event_rows()?;
        unpack_patients(events, &birthdays).context("Failed to unpack patients")
    }
}

/// Event tables and a date-of-birth table on disk
#[derive(Debug, Clone)]
pub struct CsvEventSource {
    /// Event tables, concatenated in order
    pub event_paths: Vec<PathBuf>,
    /// Date-of-birth table
    pub birthday_path: PathBuf,
    /// Parsing options shared by every table
    pub loader: LoaderConfig,
}

impl CsvEventSource {
    pub fn new(event_paths: Vec<PathBuf>, birthday_path: PathBuf) -> Self {
        Self {
            event_paths,
            birthday_path,
            loader: LoaderConfig::default(),
        }
    }

    pub fn with_loader_config(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }
}

impl EventSource for CsvEventSource {
    fn event_rows(&self) -> Result<Vec<EventRow>> {
        let loader = TableLoader::with_config(self.loader.clone());
        let mut rows = Vec::new();
        for path in &self.event_paths {
            let table = loader
                .load_events(path)
                .with_context(|| format!("Failed to load events from {:?}", path))?;
            rows.extend(table);
        }
        Ok(rows)
    }

    fn birthday_rows(&self) -> Result<Vec<BirthdayRow>> {
        TableLoader::with_config(self.loader.clone())
            .load_birthdays(&self.birthday_path)
            .with_context(|| format!("Failed to load birthdays from {:?}", self.birthday_path))
    }
}

/// Rows already held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSource {
    pub events: Vec<EventRow>,
    pub birthdays: Vec<BirthdayRow>,
}

impl InMemoryEventSource {
    pub fn new(events: Vec<EventRow>, birthdays: Vec<BirthdayRow>) -> Self {
        Self { events, birthdays }
    }
}

impl EventSource for InMemoryEventSource {
    fn event_rows(&self) -> Result<Vec<EventRow>> {
        Ok(self.events.clone())
    }

    fn birthday_rows(&self) -> Result<Vec<BirthdayRow>> {
        Ok(self.birthdays.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EventValue, PatientId};
    use chrono::NaiveDate;
    use std::io::Write;

    #[test]
    fn test_in_memory_source_missing_birthday() {
        let source = InMemoryEventSource::new(
            vec![EventRow {
                patient_id: PatientId::Int(9),
                timestamp: None,
                source_type: "sex".to_string(),
                source_subtype: None,
                value: EventValue::from("M"),
            }],
            Vec::new(),
        );

        let err = source.load_patients().unwrap_err();
        assert!(format!("{:#}", err).contains("Missing date of birth for patient 9"));
    }

    #[test]
    fn test_csv_source_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let events_path = dir.path().join("events.csv");
        let birthdays_path = dir.path().join("birthdays.csv");

        let mut events = std::fs::File::create(&events_path).unwrap();
        writeln!(events, "patient_id,timestamp,source_type,source_subtype,value").unwrap();
        writeln!(events, "1,2021-01-01,diagnosis,A,F32").unwrap();
        writeln!(events, "1,2021-02-01,diagnosis,A,F30").unwrap();

        let mut birthdays = std::fs::File::create(&birthdays_path).unwrap();
        writeln!(birthdays, "patient_id,date_of_birth").unwrap();
        writeln!(birthdays, "1,1980-05-01").unwrap();

        let source = CsvEventSource::new(vec![events_path], birthdays_path);
        let patients = source.load_patients().unwrap();

        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].temporal_events().len(), 2);
        assert_eq!(
            patients[0].date_of_birth().date(),
            NaiveDate::from_ymd_opt(1980, 5, 1).unwrap()
        );
    }
}
