//! Gated add-and-norm block applied after the decoder.

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::{param_name, LayerNorm, Module};
use crate::tft::gating::{Glu, Grn};
use ndarray::Array3;
use rand::Rng;

/// `norm2(res_grn + glu2(grn(norm1(res_dec + glu1(x)))))`.
#[derive(Clone, Debug)]
pub struct PostTransformer {
    glu1: Glu,
    norm1: LayerNorm,
    grn: Grn,
    glu2: Glu,
    norm2: LayerNorm,
}

impl PostTransformer {
    /// Create for width `d_model`.
    pub fn new<R: Rng + ?Sized>(d_model: usize, rng: &mut R) -> Self {
        Self {
            glu1: Glu::new(d_model, rng),
            norm1: LayerNorm::new(d_model),
            grn: Grn::new(d_model, rng),
            glu2: Glu::new(d_model, rng),
            norm2: LayerNorm::new(d_model),
        }
    }

    /// Apply with the two residual streams, all `(batch, time, d_model)`.
    pub fn forward(
        &self,
        x: &Array3<f32>,
        res_conn_dec: &Array3<f32>,
        res_conn_grn: &Array3<f32>,
    ) -> Result<Array3<f32>> {
        if res_conn_dec.dim() != x.dim() || res_conn_grn.dim() != x.dim() {
            let bad = if res_conn_dec.dim() != x.dim() {
                res_conn_dec
            } else {
                res_conn_grn
            };
            return Err(Error::shape("post-transformer residual", x.shape(), bad.shape()));
        }

        let h = self.norm1.forward(&(res_conn_dec + &self.glu1.forward(x)?))?;
        let h = self.grn.forward(&h)?;
        self.norm2.forward(&(res_conn_grn + &self.glu2.forward(&h)?))
    }
}

impl Module for PostTransformer {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.glu1.collect_parameters(&param_name(prefix, "glu1"), state);
        self.norm1.collect_parameters(&param_name(prefix, "norm1"), state);
        self.grn.collect_parameters(&param_name(prefix, "grn"), state);
        self.glu2.collect_parameters(&param_name(prefix, "glu2"), state);
        self.norm2.collect_parameters(&param_name(prefix, "norm2"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.glu1.load_parameters(&param_name(prefix, "glu1"), state)?;
        self.norm1.load_parameters(&param_name(prefix, "norm1"), state)?;
        self.grn.load_parameters(&param_name(prefix, "grn"), state)?;
        self.glu2.load_parameters(&param_name(prefix, "glu2"), state)?;
        self.norm2.load_parameters(&param_name(prefix, "norm2"), state)
    }
}
