//! Activation functions and softmax.

use ndarray::{Array, Array2, ArrayViewMut1, Axis, Dimension, Zip};
use serde::{Deserialize, Serialize};

/// Activation applied after a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// max(0, x)
    Relu,
    /// Pass-through
    Identity,
}

impl Activation {
    /// Apply the activation to a tensor.
    pub fn apply<D: Dimension>(&self, x: Array<f32, D>) -> Array<f32, D> {
        match self {
            Activation::Relu => relu(&x),
            Activation::Identity => x,
        }
    }
}

impl Default for Activation {
    fn default() -> Self {
        Self::Relu
    }
}

/// Rectified linear unit. NaN passes through unchanged.
pub fn relu<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| if v < 0.0 { 0.0 } else { v })
}

/// Logistic sigmoid with numerical stability.
pub fn sigmoid(x: f32) -> f32 {
    if x > 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let ex = x.exp();
        ex / (1.0 + ex)
    }
}

/// Exponential linear unit with alpha = 1.
pub fn elu<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| if v > 0.0 { v } else { v.exp() - 1.0 })
}

/// Softmax over the last axis, in place.
///
/// A lane made entirely of `-inf` becomes all NaN, the same result a
/// floating-point softmax gives for such a row.
pub fn softmax_last_axis<D: Dimension>(x: &mut Array<f32, D>) {
    if x.ndim() == 0 {
        return;
    }
    let axis = Axis(x.ndim() - 1);
    for lane in x.lanes_mut(axis) {
        softmax_lane(lane);
    }
}

fn softmax_lane(mut lane: ArrayViewMut1<'_, f32>) {
    if lane.is_empty() {
        return;
    }
    let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    lane.mapv_inplace(|v| (v - max).exp());
    let sum = lane.sum();
    lane.mapv_inplace(|v| v / sum);
}

/// Row-wise softmax over the entries where `keep` is true.
///
/// Dropped entries get weight 0. Rows with no kept entry are all NaN.
pub fn masked_softmax(scores: &Array2<f32>, keep: &Array2<bool>) -> Array2<f32> {
    let mut masked = scores.clone();
    Zip::from(&mut masked).and(keep).for_each(|s, &k| {
        if !k {
            *s = f32::NEG_INFINITY;
        }
    });
    softmax_last_axis(&mut masked);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_relu() {
        let x = array![-1.0f32, 0.0, 2.5];
        assert_eq!(relu(&x), array![0.0f32, 0.0, 2.5]);
        assert!(relu(&array![f32::NAN])[0].is_nan());
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(50.0) <= 1.0);
        assert!(sigmoid(-50.0) >= 0.0);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_elu() {
        let out = elu(&array![1.0f32, -1.0]);
        assert_eq!(out[0], 1.0);
        assert!((out[1] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut x = array![[1.0f32, 2.0, 3.0], [0.0, 0.0, 0.0]];
        softmax_last_axis(&mut x);
        for row in x.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!(x[[0, 2]] > x[[0, 1]]);
    }

    #[test]
    fn test_softmax_all_neg_inf_is_nan() {
        let mut x = Array1::from_elem(3, f32::NEG_INFINITY);
        softmax_last_axis(&mut x);
        assert!(x.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_masked_softmax() {
        let scores = array![[1.0f32, 5.0, 1.0], [2.0, 2.0, 2.0]];
        let keep = array![[true, false, true], [false, false, false]];
        let out = masked_softmax(&scores, &keep);

        assert!((out[[0, 0]] - 0.5).abs() < 1e-6);
        assert_eq!(out[[0, 1]], 0.0);
        assert!((out[[0, 2]] - 0.5).abs() < 1e-6);
        assert!(out.row(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_activation_apply() {
        let x = array![[-1.0f32, 1.0]];
        assert_eq!(Activation::Relu.apply(x.clone()), array![[0.0f32, 1.0]]);
        assert_eq!(Activation::Identity.apply(x.clone()), x);
    }
}
