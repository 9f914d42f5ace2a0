//! Conversion of encoded batches into burn integer tensors.

use crate::encoding::{EncodedBatch, Field};
use crate::error::{MedseqError, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

/// Build a `(rows, cols)` integer tensor from row-major values
pub fn int_matrix<B: Backend>(
    values: &[i64],
    shape: [usize; 2],
    device: &B::Device,
) -> Result<Tensor<B, 2, Int>> {
    let expected = shape[0] * shape[1];
    if values.len() != expected {
        return Err(MedseqError::ShapeMismatch {
            expected,
            actual: values.len(),
        });
    }
    Ok(Tensor::from_data(TensorData::new(values.to_vec(), shape), device))
}

/// Build a 1-D integer tensor
pub fn int_vector<B: Backend>(values: &[i64], device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), device)
}

/// Model inputs for one batch, each of shape `(batch_size, seq_len)`
#[derive(Debug, Clone)]
pub struct BatchTensors<B: Backend> {
    pub diagnosis: Tensor<B, 2, Int>,
    pub age: Tensor<B, 2, Int>,
    pub segment: Tensor<B, 2, Int>,
    pub position: Tensor<B, 2, Int>,
    pub is_padding: Tensor<B, 2, Int>,
}

impl EncodedBatch {
    /// Move the batch onto `device`
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> Result<BatchTensors<B>> {
        let shape = self.shape();
        let tensor = |field: Field| int_matrix::<B>(self.field(field), shape, device);

        Ok(BatchTensors {
            diagnosis: tensor(Field::Diagnosis)?,
            age: tensor(Field::Age)?,
            segment: tensor(Field::Segment)?,
            position: tensor(Field::Position)?,
            is_padding: tensor(Field::IsPadding)?,
        })
    }
}
