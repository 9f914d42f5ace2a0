use crate::data::{BirthdayRow, EventRow, EventValue, PatientId, TimestampRow, DIAGNOSIS_SOURCE_TYPE};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Timestamp layouts accepted in raw tables
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) => {
                if stem.ends_with(".csv") {
                    Ok(FileFormat::GzippedCsv)
                } else if stem.ends_with(".tsv") || stem.ends_with(".txt") {
                    Ok(FileFormat::GzippedTsv)
                } else {
                    Err(anyhow::anyhow!("Cannot determine format of gzipped file {:?}", path))
                }
            }
            (Some("csv"), _) => Ok(FileFormat::Csv),
            (Some("tsv"), _) | (Some("txt"), _) => Ok(FileFormat::Tsv),
            _ => Err(anyhow::anyhow!("Unsupported file format: {:?}", path)),
        }
    }

    /// Get delimiter character
    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Parse a timestamp cell; bare dates are read as midnight
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Table loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Batch size for progress logging
    pub batch_size: usize,
    /// Maximum number of rows to load per table (0 = unlimited)
    pub max_records: usize,
    /// Source types whose values are kept as text, so codes like `250` stay codes
    pub text_source_types: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            max_records: 0,
            text_source_types: vec![DIAGNOSIS_SOURCE_TYPE.to_string()],
        }
    }
}

/// What to do with a row that fails to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowPolicy {
    /// Log and drop the row
    Skip,
    /// Fail the whole table
    Strict,
}

/// Header lookup for one table
struct Columns<'a> {
    headers: &'a [String],
    record: &'a StringRecord,
}

impl<'a> Columns<'a> {
    fn get(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| self.record.get(idx))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn require(&self, name: &str) -> Result<&'a str> {
        self.get(name)
            .with_context(|| format!("Missing required field: {}", name))
    }

    fn timestamp(&self, name: &str) -> Result<NaiveDateTime> {
        let raw = self.require(name)?;
        parse_timestamp(raw).with_context(|| format!("Invalid timestamp in {}: {}", name, raw))
    }
}

/// Loader for the raw tables at the pipeline boundary
///
/// Every table is a CSV/TSV file with a header row, optionally gzipped.
/// Malformed event rows are logged and skipped; a malformed row in any
/// cohort table (birthdays, timestamps, code mapping) fails the load.
pub struct TableLoader {
    config: LoaderConfig,
}

impl TableLoader {
    /// Create new loader with default config
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
        }
    }

    /// Create new loader with custom config
    pub fn with_config(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Load an event table (`patient_id, timestamp, source_type, source_subtype, value`)
    pub fn load_events<P: AsRef<Path>>(&self, path: P) -> Result<Vec<EventRow>> {
        self.load_table(path.as_ref(), RowPolicy::Skip, |cols| {
            parse_event_row(cols, &self.config.text_source_types)
        })
    }

    /// Load a date-of-birth table (`patient_id, date_of_birth`)
    pub fn load_birthdays<P: AsRef<Path>>(&self, path: P) -> Result<Vec<BirthdayRow>> {
        self.load_table(path.as_ref(), RowPolicy::Strict, |cols| {
            Ok(BirthdayRow {
                patient_id: PatientId::parse(cols.require("patient_id")?),
                date_of_birth: cols.timestamp("date_of_birth")?,
            })
        })
    }

    /// Load a flat cohort table (`patient_id, timestamp`)
    pub fn load_timestamps<P: AsRef<Path>>(&self, path: P) -> Result<Vec<TimestampRow>> {
        self.load_table(path.as_ref(), RowPolicy::Strict, |cols| {
            Ok(TimestampRow {
                patient_id: PatientId::parse(cols.require("patient_id")?),
                timestamp: cols.timestamp("timestamp")?,
            })
        })
    }

    /// Load a diagnosis code to category table (`code, category`)
    pub fn load_code_mapping<P: AsRef<Path>>(&self, path: P) -> Result<HashMap<String, String>> {
        let pairs = self.load_table(path.as_ref(), RowPolicy::Strict, |cols| {
            Ok((cols.require("code")?.to_string(), cols.require("category")?.to_string()))
        })?;
        Ok(pairs.into_iter().collect())
    }

    fn load_table<T, F>(&self, path: &Path, policy: RowPolicy, parse: F) -> Result<Vec<T>>
    where
        F: Fn(&Columns<'_>) -> Result<T>,
    {
        info!("Loading table from {:?}", path);

        let format = FileFormat::from_path(path)?;
        debug!("Detected file format: {:?}", format);

        let file = File::open(path).with_context(|| format!("Failed to open file {:?}", path))?;
        let rows = if format.is_gzipped() {
            self.parse_rows(BufReader::new(GzDecoder::new(file)), format, policy, parse)?
        } else {
            self.parse_rows(BufReader::new(file), format, policy, parse)?
        };

        info!("Loaded {} rows from {:?}", rows.len(), path);
        Ok(rows)
    }

    /// Parse rows from reader
    fn parse_rows<R, T, F>(
        &self,
        reader: R,
        format: FileFormat,
        policy: RowPolicy,
        parse: F,
    ) -> Result<Vec<T>>
    where
        R: Read,
        F: Fn(&Columns<'_>) -> Result<T>,
    {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter())
            .has_headers(true)
            .from_reader(reader);

        let headers = csv_reader
            .headers()?
            .iter()
            .map(|s| s.trim().to_string())
            .collect::<Vec<_>>();

        debug!("Headers: {:?}", headers);

        let mut rows = Vec::new();
        let mut line = 1usize;

        for result in csv_reader.records() {
            line += 1;
            let record = result.context("Failed to parse CSV record")?;
            let cols = Columns { headers: &headers, record: &record };

            match parse(&cols) {
                Ok(row) => {
                    rows.push(row);

                    if self.config.max_records > 0 && rows.len() >= self.config.max_records {
                        warn!("Reached maximum record limit: {}", self.config.max_records);
                        break;
                    }

                    if rows.len() % self.config.batch_size == 0 {
                        debug!("Loaded {} rows...", rows.len());
                    }
                }
                Err(e) => match policy {
                    RowPolicy::Skip => warn!("Failed to parse row at line {}: {}", line, e),
                    RowPolicy::Strict => {
                        return Err(e.context(format!("Malformed row at line {}", line)));
                    }
                },
            }
        }

        Ok(rows)
    }
}

impl Default for TableLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_event_row(cols: &Columns<'_>, text_source_types: &[String]) -> Result<EventRow> {
    let timestamp = match cols.get("timestamp") {
        Some(raw) => Some(
            parse_timestamp(raw).with_context(|| format!("Invalid timestamp: {}", raw))?,
        ),
        None => None,
    };

    let source_type = cols.require("source_type")?;
    let raw_value = cols.require("value")?;
    let value = if text_source_types.iter().any(|t| t == source_type) {
        EventValue::Text(raw_value.to_string())
    } else {
        EventValue::parse(raw_value)
    };

    Ok(EventRow {
        patient_id: PatientId::parse(cols.require("patient_id")?),
        timestamp,
        source_type: source_type.to_string(),
        source_subtype: cols.get("source_subtype").map(str::to_string),
        value,
    })
}
