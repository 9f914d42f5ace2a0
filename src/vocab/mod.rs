//! Vocabularies mapping domain symbols to dense integer ids.
//!
//! Data-derived symbols come first in sorted order, followed by the reserved
//! symbols in the fixed order `UNK`, `PAD`, `CLS`, `MASK`. Keeping this order
//! keeps ids compatible with vocabularies saved alongside earlier checkpoints.

pub mod caliber;

use crate::data::PatientSlice;
use crate::error::{MedseqError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::path::Path;
use tracing::{info, warn};

pub use caliber::{DiagnosisExtractor, DiagnosisNormalizer, EventFilter};

/// Average year length used for age computation
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Whole years between `date_of_birth` and `timestamp`
pub fn age_in_years(date_of_birth: NaiveDateTime, timestamp: NaiveDateTime) -> i64 {
    let days = (timestamp - date_of_birth).num_days();
    (days as f64 / DAYS_PER_YEAR).floor() as i64
}

/// Symbols with a fixed meaning in every table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Reserved {
    Unk,
    Pad,
    Cls,
    Mask,
}

/// Entry of a symbol table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symbol<T> {
    Value(T),
    Reserved(Reserved),
}

/// Bijection between symbols and `[0, len)`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<Symbol<T>>", into = "Vec<Symbol<T>>")]
#[serde(bound(
    serialize = "T: Serialize + Clone",
    deserialize = "T: Deserialize<'de> + Eq + Hash + Clone"
))]
pub struct SymbolTable<T> {
    symbols: Vec<Symbol<T>>,
    index: HashMap<T, i64>,
    reserved: HashMap<Reserved, i64>,
}

impl<T: Eq + Hash + Clone> SymbolTable<T> {
    /// Enumerate `values` in iteration order, then append `reserved`
    ///
    /// Repeated values keep their first id.
    pub fn build(values: impl IntoIterator<Item = T>, reserved: &[Reserved]) -> Self {
        let mut symbols: Vec<Symbol<T>> = Vec::new();
        let mut index = HashMap::new();
        for value in values {
            if !index.contains_key(&value) {
                index.insert(value.clone(), symbols.len() as i64);
                symbols.push(Symbol::Value(value));
            }
        }
        let mut table = Self {
            symbols,
            index,
            reserved: HashMap::new(),
        };
        for &r in reserved {
            table.push_reserved(r);
        }
        table
    }

    fn push_reserved(&mut self, reserved: Reserved) {
        if !self.reserved.contains_key(&reserved) {
            self.reserved.insert(reserved, self.symbols.len() as i64);
            self.symbols.push(Symbol::Reserved(reserved));
        }
    }

    /// Number of ids
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Id of a data-derived value
    pub fn get<Q>(&self, value: &Q) -> Option<i64>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(value).copied()
    }

    /// Id of a reserved symbol, if the table has it
    pub fn reserved(&self, reserved: Reserved) -> Option<i64> {
        self.reserved.get(&reserved).copied()
    }

    /// Symbol behind `id`
    pub fn symbol(&self, id: i64) -> Option<&Symbol<T>> {
        usize::try_from(id).ok().and_then(|i| self.symbols.get(i))
    }

    /// All symbols in id order
    pub fn symbols(&self) -> &[Symbol<T>] {
        &self.symbols
    }

    fn require(&self, reserved: Reserved, table: &str) -> Result<i64> {
        self.reserved(reserved).ok_or_else(|| {
            MedseqError::InvalidConfig(format!("{} vocabulary has no {:?} symbol", table, reserved))
        })
    }
}

impl<T: Eq + Hash + Clone> From<Vec<Symbol<T>>> for SymbolTable<T> {
    fn from(symbols: Vec<Symbol<T>>) -> Self {
        let mut index = HashMap::new();
        let mut reserved = HashMap::new();
        for (id, symbol) in symbols.iter().enumerate() {
            match symbol {
                Symbol::Value(v) => {
                    index.insert(v.clone(), id as i64);
                }
                Symbol::Reserved(r) => {
                    reserved.insert(*r, id as i64);
                }
            }
        }
        Self {
            symbols,
            index,
            reserved,
        }
    }
}

impl<T> From<SymbolTable<T>> for Vec<Symbol<T>> {
    fn from(table: SymbolTable<T>) -> Self {
        table.symbols
    }
}

/// Reserved ids resolved once so lookups never fail after construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpecialIds {
    diagnosis_unk: i64,
    diagnosis_pad: i64,
    diagnosis_cls: i64,
    diagnosis_mask: Option<i64>,
    age_unk: i64,
    age_pad: i64,
    age_cls: i64,
    segment_pad: i64,
    position_pad: i64,
}

/// Serialized form of a [`Vocabulary`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyTables {
    pub diagnosis: SymbolTable<String>,
    pub age: SymbolTable<i64>,
    pub segment: SymbolTable<i64>,
    pub position: SymbolTable<i64>,
}

/// Fitted vocabularies for every encoded field
///
/// Frozen after construction; share it behind an `Arc` across workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "VocabularyTables", into = "VocabularyTables")]
pub struct Vocabulary {
    tables: VocabularyTables,
    special: SpecialIds,
}

impl TryFrom<VocabularyTables> for Vocabulary {
    type Error = MedseqError;

    fn try_from(tables: VocabularyTables) -> Result<Self> {
        let special = SpecialIds {
            diagnosis_unk: tables.diagnosis.require(Reserved::Unk, "diagnosis")?,
            diagnosis_pad: tables.diagnosis.require(Reserved::Pad, "diagnosis")?,
            diagnosis_cls: tables.diagnosis.require(Reserved::Cls, "diagnosis")?,
            diagnosis_mask: tables.diagnosis.reserved(Reserved::Mask),
            age_unk: tables.age.require(Reserved::Unk, "age")?,
            age_pad: tables.age.require(Reserved::Pad, "age")?,
            age_cls: tables.age.require(Reserved::Cls, "age")?,
            segment_pad: tables.segment.require(Reserved::Pad, "segment")?,
            position_pad: tables.position.require(Reserved::Pad, "position")?,
        };
        Ok(Self { tables, special })
    }
}

impl From<Vocabulary> for VocabularyTables {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.tables
    }
}

impl Vocabulary {
    /// Fit vocabularies on training slices
    ///
    /// Slices left without qualifying events after normalization do not
    /// contribute; how many were dropped is logged.
    pub fn fit<'a, I>(
        slices: I,
        extractor: &DiagnosisExtractor,
        max_sequence_length: usize,
        add_mask_token: bool,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = &'a PatientSlice>,
    {
        if max_sequence_length == 0 {
            return Err(MedseqError::InvalidConfig(
                "max_sequence_length must be positive".to_string(),
            ));
        }

        let mut categories: BTreeSet<String> = BTreeSet::new();
        let mut ages: BTreeSet<i64> = BTreeSet::new();
        let mut n_slices = 0usize;
        let mut n_dropped = 0usize;

        for slice in slices {
            n_slices += 1;
            let extracted = extractor.extract(slice);
            if extracted.is_empty() {
                n_dropped += 1;
                continue;
            }
            for (event, category) in extracted {
                categories.insert(category.to_string());
                ages.insert(age_in_years(slice.date_of_birth(), event.timestamp));
            }
        }

        if n_dropped > 0 {
            warn!(
                "Dropped {} of {} slices ({:.2}%) with no qualifying events while fitting the vocabulary",
                n_dropped,
                n_slices,
                crate::utils::percentage(n_dropped, n_slices)
            );
        }

        let mut diagnosis_reserved = vec![Reserved::Unk, Reserved::Pad, Reserved::Cls];
        if add_mask_token {
            diagnosis_reserved.push(Reserved::Mask);
        }
        let token_reserved = [Reserved::Unk, Reserved::Pad, Reserved::Cls];

        let tables = VocabularyTables {
            diagnosis: SymbolTable::build(categories, &diagnosis_reserved),
            age: SymbolTable::build(ages, &token_reserved),
            segment: SymbolTable::build([0, 1], &[Reserved::Pad]),
            position: SymbolTable::build(0..max_sequence_length as i64, &[Reserved::Pad]),
        };

        info!(
            "Fitted vocabulary: {} diagnosis ids, {} age ids, {} positions",
            tables.diagnosis.len(),
            tables.age.len(),
            tables.position.len() - 1
        );

        Self::try_from(tables)
    }

    pub fn diagnosis(&self) -> &SymbolTable<String> {
        &self.tables.diagnosis
    }

    pub fn age(&self) -> &SymbolTable<i64> {
        &self.tables.age
    }

    pub fn segment(&self) -> &SymbolTable<i64> {
        &self.tables.segment
    }

    pub fn position(&self) -> &SymbolTable<i64> {
        &self.tables.position
    }

    /// Longest sequence the position vocabulary can index
    pub fn max_sequence_length(&self) -> usize {
        self.tables.position.len() - 1
    }

    /// Diagnosis id of a category, `UNK` if unseen
    pub fn diagnosis_id(&self, category: &str) -> i64 {
        self.tables.diagnosis.get(category).unwrap_or(self.special.diagnosis_unk)
    }

    /// Age id, `UNK` if unseen
    pub fn age_id(&self, age: i64) -> i64 {
        self.tables.age.get(&age).unwrap_or(self.special.age_unk)
    }

    pub fn diagnosis_pad(&self) -> i64 {
        self.special.diagnosis_pad
    }

    pub fn diagnosis_cls(&self) -> i64 {
        self.special.diagnosis_cls
    }

    /// `MASK` id, present only when fitted with a mask token
    pub fn diagnosis_mask(&self) -> Option<i64> {
        self.special.diagnosis_mask
    }

    pub fn age_pad(&self) -> i64 {
        self.special.age_pad
    }

    pub fn age_cls(&self) -> i64 {
        self.special.age_cls
    }

    pub fn segment_pad(&self) -> i64 {
        self.special.segment_pad
    }

    pub fn position_pad(&self) -> i64 {
        self.special.position_pad
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON, validating reserved symbols
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Save to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        use anyhow::Context;

        let path = path.as_ref();
        let json = self.to_json().context("Failed to serialize vocabulary")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write vocabulary to {:?}", path))?;
        info!("Saved vocabulary to {:?}", path);
        Ok(())
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary from {:?}", path))?;
        Self::from_json(&json).with_context(|| format!("Invalid vocabulary file {:?}", path))
    }
}
