//! Layer normalization.

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::module::{param_name, Module};
use ndarray::{Array, Array1, Axis, Dimension, Zip};
use serde::{Deserialize, Serialize};

/// Layer normalization over the last axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    /// Create a new layer normalization layer (gamma = 1, beta = 0).
    pub fn new(dim: usize) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            eps: 1e-5,
        }
    }

    /// Normalized width.
    pub fn dim(&self) -> usize {
        self.gamma.len()
    }

    /// Normalize every lane of the last axis, then scale and shift.
    pub fn forward<D: Dimension>(&self, x: &Array<f32, D>) -> Result<Array<f32, D>> {
        let last = x.ndim().saturating_sub(1);
        if x.ndim() == 0 || x.len_of(Axis(last)) != self.dim() {
            return Err(Error::shape("layer norm input", &[self.dim()], x.shape()));
        }

        let mut out = x.clone();
        for mut lane in out.lanes_mut(Axis(last)) {
            let n = lane.len() as f32;
            let mean = lane.sum() / n;
            let variance = lane.iter().map(|&v| (v - mean).powi(2)).sum::<f32>() / n;
            let denom = (variance + self.eps).sqrt();

            Zip::from(&mut lane)
                .and(&self.gamma)
                .and(&self.beta)
                .for_each(|v, &g, &b| *v = (*v - mean) / denom * g + b);
        }
        Ok(out)
    }
}

impl Module for LayerNorm {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        state.insert(&param_name(prefix, "weight"), &self.gamma);
        state.insert(&param_name(prefix, "bias"), &self.beta);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.gamma = state.array1(&param_name(prefix, "weight"), self.dim())?;
        self.beta = state.array1(&param_name(prefix, "bias"), self.dim())?;
        Ok(())
    }
}
