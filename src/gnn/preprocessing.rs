//! Raw input to node features.
//!
//! Categorical columns are embedded, concatenated with the numeric columns
//! and passed through an MLP. The raw target column is appended unchanged
//! as the last feature, so the kernel can read past targets back out.

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::{param_name, relu, Embedding, Linear, Module};
use ndarray::{concatenate, s, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Number of trailing numeric columns; the last one is the target.
pub const NUMERIC_FIELDS: usize = 3;

/// Shape of one categorical input column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalSpec {
    /// Field name, used in parameter names
    pub name: String,
    /// Number of distinct categories
    pub cardinality: usize,
    /// Embedding width
    pub dim: usize,
}

impl CategoricalSpec {
    /// Create a new spec.
    pub fn new(name: &str, cardinality: usize, dim: usize) -> Self {
        Self {
            name: name.to_string(),
            cardinality,
            dim,
        }
    }
}

/// A categorical column and its embedding table.
#[derive(Clone, Debug)]
pub struct CategoricalField {
    /// Column spec
    pub spec: CategoricalSpec,
    /// Embedding table
    pub table: Embedding,
}

impl CategoricalField {
    fn embed_index(&self, value: f32) -> Result<usize> {
        let index = value.trunc();
        if !(index >= 0.0) || index as usize >= self.spec.cardinality {
            return Err(Error::CategoryOutOfRange {
                field: self.spec.name.clone(),
                index: value,
                size: self.spec.cardinality,
            });
        }
        Ok(index as usize)
    }
}

/// Embedding + MLP preprocessing stage.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    fields: Vec<CategoricalField>,
    mlp: Vec<Linear>,
}

impl Preprocessor {
    /// Build the embedding tables (in column order) and the MLP.
    pub fn new<R: Rng + ?Sized>(
        specs: &[CategoricalSpec],
        hidden: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in specs {
            if spec.cardinality == 0 || spec.dim == 0 {
                return Err(Error::InvalidConfig(format!(
                    "categorical field '{}' needs a non-empty table",
                    spec.name
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate categorical field '{}'",
                    spec.name
                )));
            }
        }
        if hidden == 0 {
            return Err(Error::InvalidConfig(
                "preprocessing hidden width must be positive".to_string(),
            ));
        }

        let fields: Vec<CategoricalField> = specs
            .iter()
            .map(|spec| CategoricalField {
                spec: spec.clone(),
                table: Embedding::new(spec.cardinality, spec.dim, rng),
            })
            .collect();

        let width = fields.iter().map(|f| f.spec.dim).sum::<usize>() + NUMERIC_FIELDS;
        let mlp = vec![
            Linear::new(width, hidden, true, rng),
            Linear::new(hidden, hidden, true, rng),
            Linear::new(hidden, width - 1, true, rng),
        ];

        Ok(Self { fields, mlp })
    }

    /// Number of raw input columns.
    pub fn raw_features(&self) -> usize {
        self.fields.len() + NUMERIC_FIELDS
    }

    /// Width of the produced node features (the target is the last one).
    pub fn output_dim(&self) -> usize {
        self.fields.iter().map(|f| f.spec.dim).sum::<usize>() + NUMERIC_FIELDS
    }

    /// Fields in column order.
    pub fn fields(&self) -> &[CategoricalField] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&CategoricalField> {
        self.fields.iter().find(|f| f.spec.name == name)
    }

    /// Map `(batch, time, raw_features)` to `(batch, time, output_dim)`.
    pub fn forward(&self, raw: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, time, columns) = raw.dim();
        if columns != self.raw_features() {
            return Err(Error::shape(
                "raw input",
                &[batch, time, self.raw_features()],
                raw.shape(),
            ));
        }

        let n_cat = self.fields.len();
        let width = self.output_dim();
        let mut joined = Array3::zeros((batch, time, width));
        for b in 0..batch {
            for t in 0..time {
                let mut offset = 0;
                for (i, field) in self.fields.iter().enumerate() {
                    let index = field.embed_index(raw[[b, t, i]])?;
                    let vector = field.table.lookup(index).ok_or_else(|| {
                        Error::Internal(format!("embedding '{}' lost row {}", field.spec.name, index))
                    })?;
                    joined
                        .slice_mut(s![b, t, offset..offset + field.spec.dim])
                        .assign(&vector);
                    offset += field.spec.dim;
                }
                joined
                    .slice_mut(s![b, t, offset..])
                    .assign(&raw.slice(s![b, t, n_cat..]));
            }
        }

        let last = self.mlp.len() - 1;
        let mut h = joined;
        for (i, layer) in self.mlp.iter().enumerate() {
            h = layer.forward(&h)?;
            if i < last {
                h = relu(&h);
            }
        }

        let target = raw.slice(s![.., .., columns - 1..]);
        concatenate(Axis(2), &[h.view(), target])
            .map_err(|e| Error::Internal(format!("preprocessing concat: {}", e)))
    }
}

impl Module for Preprocessor {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        let emb = param_name(prefix, "emb");
        for field in &self.fields {
            field
                .table
                .collect_parameters(&param_name(&emb, &field.spec.name), state);
        }
        let linear = param_name(prefix, "linear");
        for (i, layer) in self.mlp.iter().enumerate() {
            layer.collect_parameters(&param_name(&linear, &(2 * i).to_string()), state);
        }
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        let emb = param_name(prefix, "emb");
        for field in &mut self.fields {
            field
                .table
                .load_parameters(&param_name(&emb, &field.spec.name), state)?;
        }
        let linear = param_name(prefix, "linear");
        for (i, layer) in self.mlp.iter_mut().enumerate() {
            layer.load_parameters(&param_name(&linear, &(2 * i).to_string()), state)?;
        }
        Ok(())
    }
}
