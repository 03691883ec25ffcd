//! Embeddings for categorical covariates and the target.
//!
//! Every categorical variable, plus three positional ones derived from the
//! window, is embedded to `d_model`, giving `(batch, time, n + 3, d_model)`.

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::{param_name, Embedding, Linear, Module};
use ndarray::{s, Array3, Array4};
use rand::Rng;

/// Names of the positional variables appended after the user's columns.
pub const POSITIONAL_FIELDS: [&str; 3] = ["pos_seq", "pos_fut", "is_fut"];

/// Embedding of categorical variables with positional augmentation.
#[derive(Clone, Debug)]
pub struct CategoricalEmbedding {
    seq_len: usize,
    lag: usize,
    d_model: usize,
    tables: Vec<Embedding>,
}

impl CategoricalEmbedding {
    /// Create tables for `cardinalities` followed by `pos_seq` (size
    /// `seq_len`), `pos_fut` (size `lag + 1`) and `is_fut` (size 2).
    pub fn new<R: Rng + ?Sized>(
        seq_len: usize,
        lag: usize,
        d_model: usize,
        cardinalities: &[usize],
        rng: &mut R,
    ) -> Result<Self> {
        if seq_len == 0 || lag > seq_len || d_model == 0 {
            return Err(Error::InvalidConfig(format!(
                "invalid embedding geometry: seq_len {}, lag {}, d_model {}",
                seq_len, lag, d_model
            )));
        }
        if let Some(i) = cardinalities.iter().position(|&c| c == 0) {
            return Err(Error::InvalidConfig(format!(
                "categorical variable {} has an empty table",
                i
            )));
        }

        let tables = cardinalities
            .iter()
            .copied()
            .chain([seq_len, lag + 1, 2])
            .map(|size| Embedding::new(size, d_model, rng))
            .collect();

        Ok(Self {
            seq_len,
            lag,
            d_model,
            tables,
        })
    }

    /// Number of user categorical variables.
    pub fn num_inputs(&self) -> usize {
        self.tables.len() - POSITIONAL_FIELDS.len()
    }

    /// Number of embedded variables per step, inputs plus positional.
    pub fn num_outputs(&self) -> usize {
        self.tables.len()
    }

    /// Embedding width.
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Positional indices `[pos_seq, pos_fut, is_fut]` of step `t`.
    pub fn positional(&self, t: usize) -> [usize; 3] {
        let first_future = self.seq_len - self.lag;
        if t < first_future {
            [t, 0, 0]
        } else {
            [t, t - first_future + 1, 1]
        }
    }

    fn field_name(&self, index: usize) -> String {
        let n = self.num_inputs();
        if index < n {
            format!("cat{}", index)
        } else {
            POSITIONAL_FIELDS[index - n].to_string()
        }
    }

    /// Embed `(batch, seq_len, n)` category indices.
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array4<f32>> {
        let (batch, time, n) = x.dim();
        if time != self.seq_len || n != self.num_inputs() {
            return Err(Error::shape(
                "categorical embedding input",
                &[batch, self.seq_len, self.num_inputs()],
                x.shape(),
            ));
        }

        let mut out = Array4::zeros((batch, time, self.num_outputs(), self.d_model));
        for b in 0..batch {
            for t in 0..time {
                let positional = self.positional(t);
                for (v, table) in self.tables.iter().enumerate() {
                    let value = if v < n { x[[b, t, v]] } else { positional[v - n] as f32 };
                    let row = lookup_index(value, table.cardinality())
                        .and_then(|i| table.lookup(i))
                        .ok_or_else(|| Error::CategoryOutOfRange {
                            field: self.field_name(v),
                            index: value,
                            size: table.cardinality(),
                        })?;
                    out.slice_mut(s![b, t, v, ..]).assign(&row);
                }
            }
        }
        Ok(out)
    }
}

fn lookup_index(value: f32, size: usize) -> Option<usize> {
    let index = value.trunc();
    if index >= 0.0 && (index as usize) < size {
        Some(index as usize)
    } else {
        None
    }
}

impl Module for CategoricalEmbedding {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        let base = param_name(prefix, "cat_n_embd");
        for (i, table) in self.tables.iter().enumerate() {
            table.collect_parameters(&param_name(&base, &i.to_string()), state);
        }
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        let base = param_name(prefix, "cat_n_embd");
        for (i, table) in self.tables.iter_mut().enumerate() {
            table.load_parameters(&param_name(&base, &i.to_string()), state)?;
        }
        Ok(())
    }
}

/// Bias-free projection of a scalar target to `d_model`.
#[derive(Clone, Debug)]
pub struct TargetEmbedding {
    y_lin: Linear,
}

impl TargetEmbedding {
    /// Create for width `d_model`.
    pub fn new<R: Rng + ?Sized>(d_model: usize, rng: &mut R) -> Self {
        Self {
            y_lin: Linear::new(1, d_model, false, rng),
        }
    }

    /// Embed `(batch, time, 1)` to `(batch, time, d_model)`.
    pub fn forward(&self, y: &Array3<f32>) -> Result<Array3<f32>> {
        self.y_lin.forward(y)
    }
}

impl Module for TargetEmbedding {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.y_lin.collect_parameters(&param_name(prefix, "y_lin"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.y_lin.load_parameters(&param_name(prefix, "y_lin"), state)
    }
}
