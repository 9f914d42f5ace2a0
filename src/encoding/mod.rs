//! Encoding of patient slices into padded integer sequences.
//!
//! Every sequence starts with a `CLS` element, keeps the earliest events up
//! to `max_sequence_length` elements in total, and alternates segments
//! `0, 1, 0, ...` by position.

pub mod tensors;

use crate::data::PatientSlice;
use crate::error::{MedseqError, Result};
use crate::vocab::{age_in_years, DiagnosisExtractor, Vocabulary};
use std::sync::Arc;
use tracing::debug;

pub use tensors::BatchTensors;

/// Value of `is_padding` for real elements
pub const NOT_PADDING: i64 = 0;

/// Value of `is_padding` for padded elements
pub const PADDING: i64 = 1;

/// Named integer fields produced for each element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Diagnosis,
    Age,
    Segment,
    Position,
    IsPadding,
}

impl Field {
    /// Every field, in output order
    pub const ALL: [Field; 5] = [
        Field::Diagnosis,
        Field::Age,
        Field::Segment,
        Field::Position,
        Field::IsPadding,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Diagnosis => "diagnosis",
            Field::Age => "age",
            Field::Segment => "segment",
            Field::Position => "position",
            Field::IsPadding => "is_padding",
        }
    }
}

/// One encoded slice; all fields share the same length
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedSequence {
    pub diagnosis: Vec<i64>,
    pub age: Vec<i64>,
    pub segment: Vec<i64>,
    pub position: Vec<i64>,
    pub is_padding: Vec<i64>,
}

impl EncodedSequence {
    pub fn len(&self) -> usize {
        self.diagnosis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnosis.is_empty()
    }

    pub fn field(&self, field: Field) -> &[i64] {
        match field {
            Field::Diagnosis => &self.diagnosis,
            Field::Age => &self.age,
            Field::Segment => &self.segment,
            Field::Position => &self.position,
            Field::IsPadding => &self.is_padding,
        }
    }
}

/// Batch of encoded slices padded to a common length
///
/// Fields are stored row-major with shape `(batch_size, seq_len)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedBatch {
    pub batch_size: usize,
    pub seq_len: usize,
    pub diagnosis: Vec<i64>,
    pub age: Vec<i64>,
    pub segment: Vec<i64>,
    pub position: Vec<i64>,
    pub is_padding: Vec<i64>,
}

impl EncodedBatch {
    /// `(batch_size, seq_len)`
    pub fn shape(&self) -> [usize; 2] {
        [self.batch_size, self.seq_len]
    }

    pub fn field(&self, field: Field) -> &[i64] {
        match field {
            Field::Diagnosis => &self.diagnosis,
            Field::Age => &self.age,
            Field::Segment => &self.segment,
            Field::Position => &self.position,
            Field::IsPadding => &self.is_padding,
        }
    }

    /// Row `i` of `field`
    pub fn row(&self, field: Field, i: usize) -> &[i64] {
        let start = i * self.seq_len;
        &self.field(field)[start..start + self.seq_len]
    }

    /// Every field keyed by name
    pub fn named_fields(&self) -> Vec<(&'static str, &[i64])> {
        Field::ALL.iter().map(|f| (f.name(), self.field(*f))).collect()
    }
}

/// Turns patient slices into vocabulary ids
///
/// The encoder is unusable until a vocabulary is fitted or supplied.
#[derive(Debug, Clone)]
pub struct SequenceEncoder {
    extractor: DiagnosisExtractor,
    max_sequence_length: usize,
    add_mask_token: bool,
    vocabulary: Option<Arc<Vocabulary>>,
}

impl SequenceEncoder {
    /// Create an unfitted encoder
    pub fn new(
        extractor: DiagnosisExtractor,
        max_sequence_length: usize,
        add_mask_token: bool,
    ) -> Result<Self> {
        if max_sequence_length == 0 {
            return Err(MedseqError::InvalidConfig(
                "max_sequence_length must be positive".to_string(),
            ));
        }
        Ok(Self {
            extractor,
            max_sequence_length,
            add_mask_token,
            vocabulary: None,
        })
    }

    /// Use an already fitted vocabulary
    pub fn with_vocabulary(mut self, vocabulary: Arc<Vocabulary>) -> Result<Self> {
        if vocabulary.max_sequence_length() < self.max_sequence_length {
            return Err(MedseqError::InvalidConfig(format!(
                "vocabulary indexes {} positions but max_sequence_length is {}",
                vocabulary.max_sequence_length(),
                self.max_sequence_length
            )));
        }
        self.vocabulary = Some(vocabulary);
        Ok(self)
    }

    /// Fit the vocabulary on training slices
    pub fn fit<'a, I>(&mut self, slices: I) -> Result<Arc<Vocabulary>>
    where
        I: IntoIterator<Item = &'a PatientSlice>,
    {
        let vocabulary = Arc::new(Vocabulary::fit(
            slices,
            &self.extractor,
            self.max_sequence_length,
            self.add_mask_token,
        )?);
        self.vocabulary = Some(Arc::clone(&vocabulary));
        Ok(vocabulary)
    }

    pub fn is_fitted(&self) -> bool {
        self.vocabulary.is_some()
    }

    /// The fitted vocabulary
    pub fn vocabulary(&self) -> Result<&Arc<Vocabulary>> {
        self.vocabulary.as_ref().ok_or(MedseqError::NotFitted)
    }

    pub fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    pub fn extractor(&self) -> &DiagnosisExtractor {
        &self.extractor
    }

    /// Whether the slice has at least one qualifying, normalizable event
    pub fn has_qualifying_events(&self, slice: &PatientSlice) -> bool {
        !self.extractor.extract(slice).is_empty()
    }

    /// Encode one slice: `CLS` followed by its earliest qualifying events
    pub fn encode(&self, slice: &PatientSlice) -> Result<EncodedSequence> {
        let vocab = self.vocabulary()?;
        let extracted = self.extractor.extract(slice);

        let len = (extracted.len() + 1).min(self.max_sequence_length);
        if extracted.len() + 1 > len {
            debug!(
                "Truncating sequence of patient {} from {} to {} elements",
                slice.patient_id(),
                extracted.len() + 1,
                len
            );
        }

        let mut seq = EncodedSequence {
            diagnosis: Vec::with_capacity(len),
            age: Vec::with_capacity(len),
            segment: Vec::with_capacity(len),
            position: Vec::with_capacity(len),
            is_padding: vec![NOT_PADDING; len],
        };

        seq.diagnosis.push(vocab.diagnosis_cls());
        seq.age.push(vocab.age_cls());
        for (event, category) in extracted.into_iter().take(len - 1) {
            seq.diagnosis.push(vocab.diagnosis_id(category));
            seq.age.push(vocab.age_id(age_in_years(slice.date_of_birth(), event.timestamp)));
        }

        for i in 0..len as i64 {
            seq.position.push(vocab.position().get(&i).unwrap_or(vocab.position_pad()));
            seq.segment.push(vocab.segment().get(&(i % 2)).unwrap_or(vocab.segment_pad()));
        }

        Ok(seq)
    }

    /// Encode every slice and right-pad to the longest sequence in the batch
    pub fn collate<'a, I>(&self, slices: I) -> Result<EncodedBatch>
    where
        I: IntoIterator<Item = &'a PatientSlice>,
    {
        let vocab = self.vocabulary()?;
        let sequences = slices
            .into_iter()
            .map(|slice| self.encode(slice))
            .collect::<Result<Vec<_>>>()?;

        let seq_len = sequences.iter().map(EncodedSequence::len).max().unwrap_or(0);
        let mut batch = EncodedBatch {
            batch_size: sequences.len(),
            seq_len,
            ..EncodedBatch::default()
        };

        for seq in &sequences {
            pad_into(&mut batch.diagnosis, &seq.diagnosis, seq_len, vocab.diagnosis_pad());
            pad_into(&mut batch.age, &seq.age, seq_len, vocab.age_pad());
            pad_into(&mut batch.segment, &seq.segment, seq_len, vocab.segment_pad());
            pad_into(&mut batch.position, &seq.position, seq_len, vocab.position_pad());
            pad_into(&mut batch.is_padding, &seq.is_padding, seq_len, PADDING);
        }

        Ok(batch)
    }
}

fn pad_into(out: &mut Vec<i64>, values: &[i64], len: usize, pad: i64) {
    out.extend_from_slice(values);
    out.extend(std::iter::repeat(pad).take(len - values.len()));
}
