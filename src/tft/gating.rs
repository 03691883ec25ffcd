//! Gated units: GLU, GRN and the flattened GRN producing selection weights.

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::{elu, param_name, sigmoid, softmax_last_axis, LayerNorm, Linear, Module};
use ndarray::Array3;
use rand::Rng;

/// Gated linear unit, `sigmoid(L1 x) ⊙ L2 x`.
#[derive(Clone, Debug)]
pub struct Glu {
    linear1: Linear,
    linear2: Linear,
}

impl Glu {
    /// Create a GLU of width `d_model`.
    pub fn new<R: Rng + ?Sized>(d_model: usize, rng: &mut R) -> Self {
        Self {
            linear1: Linear::new(d_model, d_model, true, rng),
            linear2: Linear::new(d_model, d_model, true, rng),
        }
    }

    /// Width.
    pub fn dim(&self) -> usize {
        self.linear1.in_dim()
    }

    /// Apply to `(batch, time, d_model)`.
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let gate = self.linear1.forward(x)?.mapv(sigmoid);
        let value = self.linear2.forward(x)?;
        Ok(gate * value)
    }
}

impl Module for Glu {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.linear1.collect_parameters(&param_name(prefix, "linear1"), state);
        self.linear2.collect_parameters(&param_name(prefix, "linear2"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.linear1.load_parameters(&param_name(prefix, "linear1"), state)?;
        self.linear2.load_parameters(&param_name(prefix, "linear2"), state)
    }
}

/// Gated residual network, `norm(x + glu(L2 elu(L1 x)))`.
#[derive(Clone, Debug)]
pub struct Grn {
    linear1: Linear,
    linear2: Linear,
    glu: Glu,
    norm: LayerNorm,
}

impl Grn {
    /// Create a GRN of width `d_model`.
    pub fn new<R: Rng + ?Sized>(d_model: usize, rng: &mut R) -> Self {
        Self {
            linear1: Linear::new(d_model, d_model, true, rng),
            linear2: Linear::new(d_model, d_model, true, rng),
            glu: Glu::new(d_model, rng),
            norm: LayerNorm::new(d_model),
        }
    }

    /// Apply to `(batch, time, d_model)`.
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let eta1 = elu(&self.linear1.forward(x)?);
        let eta2 = self.linear2.forward(&eta1)?;
        let gated = self.glu.forward(&eta2)?;
        self.norm.forward(&(x + &gated))
    }
}

impl Module for Grn {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.linear1.collect_parameters(&param_name(prefix, "linear1"), state);
        self.linear2.collect_parameters(&param_name(prefix, "linear2"), state);
        self.glu.collect_parameters(&param_name(prefix, "glu"), state);
        self.norm.collect_parameters(&param_name(prefix, "norm"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.linear1.load_parameters(&param_name(prefix, "linear1"), state)?;
        self.linear2.load_parameters(&param_name(prefix, "linear2"), state)?;
        self.glu.load_parameters(&param_name(prefix, "glu"), state)?;
        self.norm.load_parameters(&param_name(prefix, "norm"), state)
    }
}

/// GRN over flattened variables that ends in a softmax.
///
/// Maps `(batch, time, start)` to weights `(batch, time, end)` summing to 1
/// along the last axis. The residual path is a bias-free projection.
#[derive(Clone, Debug)]
pub struct FlattenGrn {
    res_conn: Linear,
    linear1: Linear,
    linear2: Linear,
    glu: Glu,
    norm: LayerNorm,
}

impl FlattenGrn {
    /// Create with widths `[start, mid, end]`.
    pub fn new<R: Rng + ?Sized>(dims: [usize; 3], rng: &mut R) -> Result<Self> {
        let [start, mid, end] = dims;
        if start == 0 || mid == 0 || end == 0 {
            return Err(Error::InvalidConfig(format!(
                "flattened GRN widths must be positive, got {:?}",
                dims
            )));
        }
        Ok(Self {
            res_conn: Linear::new(start, end, false, rng),
            linear1: Linear::new(start, mid, false, rng),
            linear2: Linear::new(mid, end, false, rng),
            glu: Glu::new(end, rng),
            norm: LayerNorm::new(end),
        })
    }

    /// Output width.
    pub fn out_dim(&self) -> usize {
        self.res_conn.out_dim()
    }

    /// Apply to `(batch, time, start)`.
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let residual = self.res_conn.forward(x)?;
        let eta1 = elu(&self.linear1.forward(x)?);
        let eta2 = self.linear2.forward(&eta1)?;
        let gated = self.glu.forward(&eta2)?;
        let mut out = self.norm.forward(&(residual + gated))?;
        softmax_last_axis(&mut out);
        Ok(out)
    }
}

impl Module for FlattenGrn {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.res_conn.collect_parameters(&param_name(prefix, "res_conn"), state);
        self.linear1.collect_parameters(&param_name(prefix, "linear1"), state);
        self.linear2.collect_parameters(&param_name(prefix, "linear2"), state);
        self.glu.collect_parameters(&param_name(prefix, "glu"), state);
        self.norm.collect_parameters(&param_name(prefix, "norm"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.res_conn.load_parameters(&param_name(prefix, "res_conn"), state)?;
        self.linear1.load_parameters(&param_name(prefix, "linear1"), state)?;
        self.linear2.load_parameters(&param_name(prefix, "linear2"), state)?;
        self.glu.load_parameters(&param_name(prefix, "glu"), state)?;
        self.norm.load_parameters(&param_name(prefix, "norm"), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn input(batch: usize, time: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch, time, width), |(b, t, c)| {
            ((b * 7 + t * 3 + c) as f32 * 0.37).sin()
        })
    }

    #[test]
    fn test_glu_gate_bounds_output() {
        let mut rng = StdRng::seed_from_u64(0);
        let glu = Glu::new(4, &mut rng);
        let x = input(2, 3, 4);
        let out = glu.forward(&x).unwrap();
        let value = glu.linear2.forward(&x).unwrap();

        assert_eq!(out.dim(), (2, 3, 4));
        for (o, v) in out.iter().zip(value.iter()) {
            assert!(o.abs() <= v.abs() + 1e-6);
        }
    }

    #[test]
    fn test_grn_is_normalized() {
        let mut rng = StdRng::seed_from_u64(1);
        let grn = Grn::new(6, &mut rng);
        let out = grn.forward(&input(2, 5, 6)).unwrap();

        assert_eq!(out.dim(), (2, 5, 6));
        for lane in out.lanes(Axis(2)) {
            let mean = lane.sum() / 6.0;
            assert!(mean.abs() < 1e-4);
        }
    }

    #[test]
    fn test_flatten_grn_weights() {
        let mut rng = StdRng::seed_from_u64(2);
        let flat = FlattenGrn::new([12, 3, 3], &mut rng).unwrap();
        let out = flat.forward(&input(2, 4, 12)).unwrap();

        assert_eq!(out.dim(), (2, 4, 3));
        assert_eq!(flat.out_dim(), 3);
        for lane in out.lanes(Axis(2)) {
            assert!((lane.sum() - 1.0).abs() < 1e-5);
            assert!(lane.iter().all(|&w| w > 0.0));
        }
    }

    #[test]
    fn test_flatten_grn_has_no_biases() {
        let mut rng = StdRng::seed_from_u64(3);
        let flat = FlattenGrn::new([8, 2, 2], &mut rng).unwrap();
        let state = flat.state_dict();
        assert!(state.contains("res_conn.weight"));
        assert!(!state.contains("res_conn.bias"));
        assert!(!state.contains("linear1.bias"));
        assert!(state.contains("glu.linear1.bias"));
    }

    #[test]
    fn test_flatten_grn_rejects_zero_width() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(FlattenGrn::new([4, 0, 2], &mut rng).is_err());
    }

    #[test]
    fn test_width_mismatch() {
        let mut rng = StdRng::seed_from_u64(4);
        let grn = Grn::new(4, &mut rng);
        assert!(matches!(
            grn.forward(&input(1, 2, 5)),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
