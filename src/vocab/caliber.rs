//! Diagnosis code normalization into coarse disease categories.

use crate::data::{PatientSlice, TemporalEvent, DIAGNOSIS_SOURCE_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shortest code prefix tried during normalization
pub const MIN_CODE_LENGTH: usize = 3;

/// Maps ICD-10-like codes onto categories by longest matching prefix
#[derive(Debug, Clone, Default)]
pub struct DiagnosisNormalizer {
    table: HashMap<String, String>,
}

impl DiagnosisNormalizer {
    pub fn new(table: HashMap<String, String>) -> Self {
        Self { table }
    }

    /// Build from `(code, category)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Number of codes in the table
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Category of `code`, trying the full code first and then ever shorter
    /// prefixes down to [`MIN_CODE_LENGTH`] characters
    pub fn normalize(&self, code: &str) -> Option<&str> {
        let code = code.trim();
        let ends: Vec<usize> = code.char_indices().map(|(i, c)| i + c.len_utf8()).collect();

        (MIN_CODE_LENGTH..=ends.len())
            .rev()
            .find_map(|n| self.table.get(&code[..ends[n - 1]]))
            .map(String::as_str)
    }
}

/// Which temporal events count as tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Required source type
    pub source_type: String,
    /// Required subtype; `None` accepts any
    pub source_subtype: Option<String>,
}

impl EventFilter {
    /// Diagnosis events of any subtype
    pub fn diagnoses() -> Self {
        Self {
            source_type: DIAGNOSIS_SOURCE_TYPE.to_string(),
            source_subtype: None,
        }
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.source_subtype = Some(subtype.into());
        self
    }

    /// Whether `event` qualifies; only text-valued events can carry codes
    pub fn matches(&self, event: &TemporalEvent) -> bool {
        event.source_type == self.source_type
            && self
                .source_subtype
                .as_ref()
                .map_or(true, |sub| event.source_subtype.as_ref() == Some(sub))
            && event.value.as_text().is_some()
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::diagnoses()
    }
}

/// Filter plus normalizer, shared by vocabulary fitting and encoding
#[derive(Debug, Clone, Default)]
pub struct DiagnosisExtractor {
    pub filter: EventFilter,
    pub normalizer: DiagnosisNormalizer,
}

impl DiagnosisExtractor {
    pub fn new(filter: EventFilter, normalizer: DiagnosisNormalizer) -> Self {
        Self { filter, normalizer }
    }

    /// Qualifying events of a slice with their categories, in timestamp order
    ///
    /// Events whose code has no category are dropped.
    pub fn extract<'a>(&'a self, slice: &'a PatientSlice) -> Vec<(&'a TemporalEvent, &'a str)> {
        slice
            .temporal_events()
            .iter()
            .filter(|e| self.filter.matches(e))
            .filter_map(|e| {
                e.value
                    .as_text()
                    .and_then(|code| self.normalizer.normalize(code))
                    .map(|category| (e, category))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Patient;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Arc;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn mood_normalizer() -> DiagnosisNormalizer {
        DiagnosisNormalizer::from_pairs([
            ("F30", "Bipolar"),
            ("F31", "Bipolar"),
            ("F32", "Depression"),
        ])
    }

    #[test]
    fn test_longest_prefix_wins() {
        let normalizer = DiagnosisNormalizer::from_pairs([("E1", "X"), ("E12", "Y")]);

        assert_eq!(normalizer.normalize("E121"), Some("Y"));
        assert_eq!(normalizer.normalize("E12"), Some("Y"));
        // prefixes shorter than three characters are never tried
        assert_eq!(normalizer.normalize("E131"), None);
        assert_eq!(normalizer.normalize("E1"), None);
    }

    #[test]
    fn test_normalize_mood_codes() {
        let normalizer = mood_normalizer();
        let got: Vec<Option<&str>> = ["F30", "F31", "F32", "F431"]
            .iter()
            .map(|c| normalizer.normalize(c))
            .collect();

        assert_eq!(got, vec![Some("Bipolar"), Some("Bipolar"), Some("Depression"), None]);
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::diagnoses().with_subtype("A");
        let primary = TemporalEvent::new(ts(2021, 1, 1), "diagnosis", "F32").with_subtype("A");
        let secondary = TemporalEvent::new(ts(2021, 1, 1), "diagnosis", "F32").with_subtype("B");
        let numeric = TemporalEvent::new(ts(2021, 1, 1), "diagnosis", 32.0).with_subtype("A");
        let medication = TemporalEvent::new(ts(2021, 1, 1), "medication", "N05").with_subtype("A");

        assert!(filter.matches(&primary));
        assert!(!filter.matches(&secondary));
        assert!(!filter.matches(&numeric));
        assert!(!filter.matches(&medication));
        assert!(EventFilter::diagnoses().matches(&secondary));
    }

    #[test]
    fn test_extract_drops_unmapped_codes() {
        let mut patient = Patient::new(1i64, ts(1980, 1, 1));
        patient.add_events(vec![
            TemporalEvent::new(ts(2021, 1, 2), "diagnosis", "F431"),
            TemporalEvent::new(ts(2021, 1, 1), "diagnosis", "F320"),
            TemporalEvent::new(ts(2021, 1, 3), "medication", "F30"),
        ]);
        let slice = Arc::new(patient).unfiltered_slice();
        let extractor = DiagnosisExtractor::new(EventFilter::diagnoses(), mood_normalizer());

        let extracted = extractor.extract(&slice);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].1, "Depression");
        assert_eq!(extracted[0].0.timestamp, ts(2021, 1, 1));
    }
}
