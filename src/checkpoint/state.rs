//! Named parameter tensors.

use crate::core::{Error, Result};
use ndarray::{Array, Array1, Array2, Dimension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A flattened tensor with its shape, in row-major order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Row-major values
    pub data: Vec<f32>,
}

impl TensorRecord {
    /// Capture an array.
    pub fn from_array<D: Dimension>(array: &Array<f32, D>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    /// Number of scalar values.
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

/// Mapping from parameter name to tensor value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    tensors: BTreeMap<String, TensorRecord>,
}

impl StateDict {
    /// Create an empty state dict.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tensor.
    pub fn insert<D: Dimension>(&mut self, name: &str, array: &Array<f32, D>) {
        self.tensors
            .insert(name.to_string(), TensorRecord::from_array(array));
    }

    /// Insert a single learned scalar, stored with shape `[1]`.
    pub fn insert_scalar(&mut self, name: &str, value: f32) {
        self.tensors.insert(
            name.to_string(),
            TensorRecord {
                shape: vec![1],
                data: vec![value],
            },
        );
    }

    /// Insert or replace a raw record.
    pub fn insert_record(&mut self, name: &str, record: TensorRecord) {
        self.tensors.insert(name.to_string(), record);
    }

    /// Get a raw record.
    pub fn get(&self, name: &str) -> Option<&TensorRecord> {
        self.tensors.get(name)
    }

    /// Whether a parameter exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    fn record(&self, name: &str, expected: &[usize]) -> Result<&TensorRecord> {
        let record = self
            .tensors
            .get(name)
            .ok_or_else(|| Error::MissingParameter(name.to_string()))?;
        if record.shape != expected {
            return Err(Error::shape(name, expected, &record.shape));
        }
        let numel: usize = expected.iter().product();
        if record.data.len() != numel {
            return Err(Error::DeserializationError(format!(
                "{}: shape {:?} needs {} values, found {}",
                name,
                expected,
                numel,
                record.data.len()
            )));
        }
        Ok(record)
    }

    /// Read a vector of the given length.
    pub fn array1(&self, name: &str, len: usize) -> Result<Array1<f32>> {
        let record = self.record(name, &[len])?;
        Ok(Array1::from_vec(record.data.clone()))
    }

    /// Read a matrix of the given shape.
    pub fn array2(&self, name: &str, shape: (usize, usize)) -> Result<Array2<f32>> {
        let record = self.record(name, &[shape.0, shape.1])?;
        Array2::from_shape_vec(shape, record.data.clone())
            .map_err(|e| Error::DeserializationError(format!("{}: {}", name, e)))
    }

    /// Read a learned scalar.
    pub fn scalar(&self, name: &str) -> Result<f32> {
        let record = self.record(name, &[1])?;
        record
            .data
            .first()
            .copied()
            .ok_or_else(|| Error::MissingParameter(name.to_string()))
    }

    /// Parameter names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Number of named tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the dict is empty.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.tensors.values().map(TensorRecord::numel).sum()
    }
}
