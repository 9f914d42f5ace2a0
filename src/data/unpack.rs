//! Unpacking of raw event rows into [`Patient`] objects.

use crate::data::{BirthdayRow, EventRow, Patient, PatientId};
use crate::error::{MedseqError, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Group event rows by patient and attach dates of birth
///
/// Patients are returned in the order of the birthday table, one per distinct
/// id. Within a patient, events keep their row order. An event row whose
/// patient has no birthday row fails the whole pass with
/// [`MedseqError::MissingDateOfBirth`].
pub fn unpack_patients(
    events: impl IntoIterator<Item = EventRow>,
    birthdays: &[BirthdayRow],
) -> Result<Vec<Patient>> {
    let mut patients: Vec<Patient> = Vec::with_capacity(birthdays.len());
    let mut index: HashMap<PatientId, usize> = HashMap::with_capacity(birthdays.len());

    for row in birthdays {
        if index.contains_key(&row.patient_id) {
            warn!("Duplicate date of birth for patient {}, keeping the first", row.patient_id);
            continue;
        }
        index.insert(row.patient_id.clone(), patients.len());
        patients.push(Patient::new(row.patient_id.clone(), row.date_of_birth));
    }

    let mut n_rows = 0usize;
    for row in events {
        let idx = *index
            .get(&row.patient_id)
            .ok_or_else(|| MedseqError::MissingDateOfBirth {
                patient_id: row.patient_id.clone(),
            })?;
        patients[idx].add_event(row.into_event());
        n_rows += 1;
    }

    let without_events = patients.iter().filter(|p| p.n_events() == 0).count();
    if without_events > 0 {
        debug!("{} patients have a date of birth but no events", without_events);
    }

    info!("Unpacked {} event rows into {} patients", n_rows, patients.len());
    Ok(patients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EventValue;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn row(patient_id: i64, timestamp: Option<NaiveDateTime>, value: &str) -> EventRow {
        EventRow {
            patient_id: PatientId::Int(patient_id),
            timestamp,
            source_type: "diagnosis".to_string(),
            source_subtype: None,
            value: EventValue::parse(value),
        }
    }

    fn birthdays() -> Vec<BirthdayRow> {
        vec![
            BirthdayRow { patient_id: PatientId::Int(1), date_of_birth: ts(1980, 1, 1) },
            BirthdayRow { patient_id: PatientId::Int(2), date_of_birth: ts(1990, 6, 1) },
        ]
    }

    #[test]
    fn test_unpack_groups_by_patient() {
        let events = vec![
            row(2, Some(ts(2021, 1, 1)), "F32"),
            row(1, Some(ts(2021, 1, 2)), "F30"),
            row(2, None, "M"),
        ];

        let patients = unpack_patients(events, &birthdays()).unwrap();

        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].patient_id(), &PatientId::Int(1));
        assert_eq!(patients[0].temporal_events().len(), 1);
        assert_eq!(patients[1].temporal_events().len(), 1);
        assert_eq!(patients[1].static_features().len(), 1);
        assert_eq!(patients[1].date_of_birth(), ts(1990, 6, 1));
    }

    #[test]
    fn test_unpack_missing_birthday_fails() {
        let events = vec![row(3, Some(ts(2021, 1, 1)), "F32")];

        let err = unpack_patients(events, &birthdays()).unwrap_err();
        assert_eq!(
            err,
            MedseqError::MissingDateOfBirth { patient_id: PatientId::Int(3) }
        );
    }
}
