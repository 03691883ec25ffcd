//! Kernel-weighted temporal attention.
//!
//! Each future step attends over the past steps. The score of a pair is a
//! learned quadratic-form distance between their features,
//! `-0.5 · dᵀ θ d / temperature` with `d = x_past - x_future`, restricted to
//! the past→future edges that survive in the learned adjacency. The
//! softmax-normalized scores then mix the past targets into a future target
//! estimate.

use crate::checkpoint::StateDict;
use crate::core::{Error, ForecastWindow, Result};
use crate::gnn::adjacency::cross_block;
use crate::nn::{masked_softmax, param_name, sigmoid, softmax_last_axis, Module};
use ndarray::{s, Array2, Array3, ArrayView2, Axis, Zip};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What to do with a future step whose every past edge is masked out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskedRowPolicy {
    /// Keep the floating-point result of a softmax over `-inf`: NaN weights.
    Propagate,
    /// Spread the weight uniformly over all past steps.
    Uniform,
}

impl Default for MaskedRowPolicy {
    fn default() -> Self {
        Self::Propagate
    }
}

/// Fixed (non-learned) settings of the kernel attention.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelSettings {
    /// Normalized edge weights below this are dropped
    pub threshold: f32,
    /// Multiplier applied to `sigmoid(smoothing)` to get the temperature
    pub temperature_scale: f32,
    /// Handling of fully masked rows
    pub masked_rows: MaskedRowPolicy,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            threshold: 4e-3,
            temperature_scale: 0.01,
            masked_rows: MaskedRowPolicy::Propagate,
        }
    }
}

/// Kernel attention from past nodes to future nodes.
#[derive(Clone, Debug)]
pub struct KernelAttention {
    window: ForecastWindow,
    /// Factor of the quadratic form, `(features, hidden)`
    w: Array2<f32>,
    /// Pre-sigmoid temperature
    smoothing: f32,
    settings: KernelSettings,
}

impl KernelAttention {
    /// Create with standard-normal `W` and smoothing.
    pub fn new<R: Rng + ?Sized>(
        features: usize,
        hidden: usize,
        window: ForecastWindow,
        settings: KernelSettings,
        rng: &mut R,
    ) -> Self {
        let w: Array2<f32> = Array2::from_shape_fn((features, hidden), |_| StandardNormal.sample(rng));
        let smoothing: f32 = StandardNormal.sample(rng);
        Self {
            window,
            w,
            smoothing,
            settings,
        }
    }

    /// Create from explicit parameters.
    pub fn from_parts(
        w: Array2<f32>,
        smoothing: f32,
        window: ForecastWindow,
        settings: KernelSettings,
    ) -> Self {
        Self {
            window,
            w,
            smoothing,
            settings,
        }
    }

    /// Feature width the kernel compares.
    pub fn features(&self) -> usize {
        self.w.nrows()
    }

    /// Settings in use.
    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    /// The symmetric quadratic form `θ = ½ (W Wᵀ + (W Wᵀ)ᵀ)`.
    pub fn theta(&self) -> Array2<f32> {
        let gram = self.w.dot(&self.w.t());
        (&gram + &gram.t()) * 0.5
    }

    /// Temperature `sigmoid(smoothing) · temperature_scale`.
    pub fn temperature(&self) -> f32 {
        sigmoid(self.smoothing) * self.settings.temperature_scale
    }

    fn check_features(&self, x: &Array3<f32>) -> Result<()> {
        let (batch, time, features) = x.dim();
        if time != self.window.total() || features != self.features() {
            return Err(Error::shape(
                "kernel features",
                &[batch, self.window.total(), self.features()],
                x.shape(),
            ));
        }
        Ok(())
    }

    /// Unmasked log-weights, `(batch, future, past)`.
    ///
    /// `scores[b, f, p] = -0.5 · dᵀ θ d / temperature` with
    /// `d = x[b, p] - x[b, past + f]`. This is the diagonal of the full
    /// `(future, past, past)` grid `diff · θ · diffᵀ`, computed per pair.
    pub fn scores(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        self.check_features(x)?;
        let (batch, _, _) = x.dim();
        let (past, future) = (self.window.past, self.window.future);
        let theta = self.theta();
        let scale = -0.5 / self.temperature();

        let mut scores = Array3::zeros((batch, future, past));
        for (xb, mut sb) in x.outer_iter().zip(scores.outer_iter_mut()) {
            let x_past = xb.slice(s![..past, ..]);
            for (f, mut row) in sb.outer_iter_mut().enumerate() {
                let x_future = xb.row(past + f);
                let diff: Array2<f32> = &x_past - &x_future;
                let quad = (diff.dot(&theta) * &diff).sum_axis(Axis(1));
                row.assign(&(quad * scale));
            }
        }
        Ok(scores)
    }

    /// Past→future edges kept by the adjacency, `(future, past)`.
    ///
    /// The cross block of `adjacency` is re-normalized row-wise over its
    /// non-zero entries; an edge is dropped when its weight is below the
    /// threshold. A row with no non-zero entry normalizes to NaN, which never
    /// compares below the threshold, so all of its edges are kept.
    pub fn edge_mask(&self, adjacency: &Array2<f32>) -> Result<Array2<bool>> {
        let n = self.window.total();
        if adjacency.dim() != (n, n) {
            return Err(Error::shape("kernel adjacency", &[n, n], adjacency.shape()));
        }
        let cross = cross_block(adjacency, self.window);
        let present = cross.mapv(|v| v != 0.0);
        let normalized = masked_softmax(&cross.to_owned(), &present);
        let threshold = self.settings.threshold;
        Ok(normalized.mapv(|v| !(v < threshold)))
    }

    /// Normalized attention of each future step over the past, `(batch, future, past)`.
    pub fn attention(&self, x: &Array3<f32>, adjacency: &Array2<f32>) -> Result<Array3<f32>> {
        let mask = self.edge_mask(adjacency)?;
        self.attention_with_mask(x, mask.view())
    }

    /// Attention against an explicit `(future, past)` keep-mask.
    pub fn attention_with_mask(
        &self,
        x: &Array3<f32>,
        keep: ArrayView2<'_, bool>,
    ) -> Result<Array3<f32>> {
        let (past, future) = (self.window.past, self.window.future);
        if keep.dim() != (future, past) {
            return Err(Error::shape("kernel mask", &[future, past], keep.shape()));
        }

        let mut alpha = self.scores(x)?;
        for mut ab in alpha.outer_iter_mut() {
            Zip::from(&mut ab).and(&keep).for_each(|a, &k| {
                if !k {
                    *a = f32::NEG_INFINITY;
                }
            });
        }
        softmax_last_axis(&mut alpha);

        let empty_rows: Vec<usize> = keep
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| !row.iter().any(|&k| k))
            .map(|(f, _)| f)
            .collect();
        if !empty_rows.is_empty() {
            warn!(
                rows = ?empty_rows,
                policy = ?self.settings.masked_rows,
                "future steps with every past edge masked"
            );
            if self.settings.masked_rows == MaskedRowPolicy::Uniform {
                let uniform = 1.0 / past as f32;
                for mut ab in alpha.outer_iter_mut() {
                    for &f in &empty_rows {
                        ab.row_mut(f).fill(uniform);
                    }
                }
            }
        }

        Ok(alpha)
    }

    /// Mix past targets into future estimates.
    ///
    /// `x` is `(batch, past + future, features)`, `y` is
    /// `(batch, past, target_dim)`, `adjacency` is the full `(N, N)` matrix.
    /// Returns `(batch, future, target_dim)`.
    pub fn forward(
        &self,
        x: &Array3<f32>,
        y: &Array3<f32>,
        adjacency: &Array2<f32>,
    ) -> Result<Array3<f32>> {
        let (batch, past, target_dim) = y.dim();
        if batch != x.dim().0 || past != self.window.past {
            return Err(Error::shape(
                "kernel targets",
                &[x.dim().0, self.window.past, target_dim],
                y.shape(),
            ));
        }

        let alpha = self.attention(x, adjacency)?;
        let mut out = Array3::zeros((batch, self.window.future, target_dim));
        for ((ab, yb), mut ob) in alpha
            .outer_iter()
            .zip(y.outer_iter())
            .zip(out.outer_iter_mut())
        {
            ob.assign(&ab.dot(&yb));
        }

        debug!(
            batch,
            past = self.window.past,
            future = self.window.future,
            target_dim,
            "kernel attention forward"
        );
        Ok(out)
    }
}

impl Module for KernelAttention {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        state.insert(&param_name(prefix, "W"), &self.w);
        state.insert_scalar(&param_name(prefix, "smoothing"), self.smoothing);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.w = state.array2(&param_name(prefix, "W"), self.w.dim())?;
        self.smoothing = state.scalar(&param_name(prefix, "smoothing"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnn::adjacency::LearnedAdjacency;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn kernel(features: usize, window: ForecastWindow, seed: u64) -> KernelAttention {
        let mut rng = StdRng::seed_from_u64(seed);
        KernelAttention::new(features, 3, window, KernelSettings::default(), &mut rng)
    }

    fn features(batch: usize, window: ForecastWindow, width: usize, seed: u64) -> Array3<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_fn((batch, window.total(), width), |_| {
            let v: f32 = StandardNormal.sample(&mut rng);
            v * 0.1
        })
    }

    /// Dense adjacency where every past→future edge carries equal weight.
    fn uniform_cross(window: ForecastWindow) -> Array2<f32> {
        let n = window.total();
        Array2::from_shape_fn((n, n), |(i, j)| {
            if i >= window.past && j < window.past {
                1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn test_theta_is_symmetric() {
        for seed in 0..5 {
            let k = kernel(6, ForecastWindow::new(4, 2), seed);
            let theta = k.theta();
            assert_eq!(theta, theta.t().to_owned());
        }
    }

    #[test]
    fn test_theta_is_positive_semidefinite() {
        let k = kernel(4, ForecastWindow::new(4, 2), 3);
        let theta = k.theta();
        let v = array![0.3f32, -1.0, 2.0, 0.5];
        assert!(v.dot(&theta.dot(&v)) >= -1e-5);
    }

    #[test]
    fn test_scores_match_full_grid_diagonal() {
        let window = ForecastWindow::new(4, 2);
        let k = kernel(3, window, 8);
        let x = features(1, window, 3, 9);
        let scores = k.scores(&x).unwrap();

        let theta = k.theta();
        let scale = -0.5 / k.temperature();
        let x_past = x.slice(s![0, ..4, ..]);
        for f in 0..2 {
            let diff: Array2<f32> = &x_past - &x.slice(s![0, 4 + f, ..]);
            let grid = diff.dot(&theta).dot(&diff.t());
            for p in 0..4 {
                let expected = grid[[p, p]] * scale;
                assert!((scores[[0, f, p]] - expected).abs() < 1e-4 * expected.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_closer_past_step_scores_higher() {
        let window = ForecastWindow::new(2, 1);
        let k = KernelAttention::from_parts(
            Array2::eye(2),
            0.0,
            window,
            KernelSettings::default(),
        );
        let x = array![[[0.0f32, 0.0], [5.0, 5.0], [0.1, 0.0]]];
        let scores = k.scores(&x).unwrap();
        assert!(scores[[0, 0, 0]] > scores[[0, 0, 1]]);
    }

    #[test]
    fn test_output_shape_for_any_batch() {
        let window = ForecastWindow::new(6, 3);
        let k = kernel(4, window, 1);
        let adjacency = uniform_cross(window);
        for batch in [1, 2, 5] {
            let x = features(batch, window, 4, batch as u64);
            let y = Array3::ones((batch, 6, 2));
            let out = k.forward(&x, &y, &adjacency).unwrap();
            assert_eq!(out.dim(), (batch, 3, 2));
        }
    }

    #[test]
    fn test_attention_rows_sum_to_one() {
        let window = ForecastWindow::new(5, 3);
        let k = kernel(4, window, 2);
        let mut rng = StdRng::seed_from_u64(2);
        let adjacency = LearnedAdjacency::new(window, &mut rng).unwrap().build();
        let x = features(2, window, 4, 4);

        let alpha = k.attention(&x, &adjacency).unwrap();
        for lane in alpha.lanes(Axis(2)) {
            assert!((lane.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_attention_normalized_over_past_axis() {
        // both future steps sit next to past step 0
        let window = ForecastWindow::new(2, 2);
        let k = KernelAttention::from_parts(
            Array2::eye(2),
            0.0,
            window,
            KernelSettings::default(),
        );
        let x = array![[[0.0f32, 0.0], [5.0, 5.0], [0.1, 0.0], [0.0, 0.2]]];

        let alpha = k.attention(&x, &uniform_cross(window)).unwrap();
        for lane in alpha.lanes(Axis(2)) {
            assert!((lane.sum() - 1.0).abs() < 1e-5);
        }
        let over_future = alpha.sum_axis(Axis(1));
        assert!(over_future[[0, 0]] > 1.9);
        assert!(over_future[[0, 1]] < 0.1);
    }

    #[test]
    fn test_constant_targets_pass_through() {
        let window = ForecastWindow::new(4, 2);
        let k = kernel(3, window, 5);
        let x = features(2, window, 3, 6);
        let y = Array3::from_elem((2, 4, 1), 7.0f32);
        let out = k.forward(&x, &y, &uniform_cross(window)).unwrap();
        assert!(out.iter().all(|v| (v - 7.0).abs() < 1e-4));
    }

    #[test]
    fn test_edge_mask_threshold() {
        let window = ForecastWindow::new(3, 1);
        let k = kernel(2, window, 0);
        let mut adjacency = Array2::zeros((4, 4));
        // After re-normalization the first edge is tiny.
        adjacency[[3, 0]] = -10.0;
        adjacency[[3, 1]] = 1.0;
        adjacency[[3, 2]] = 1.0;

        let mask = k.edge_mask(&adjacency).unwrap();
        assert_eq!(mask.row(0).to_vec(), vec![false, true, true]);
    }

    #[test]
    fn test_edge_mask_keeps_rows_without_edges() {
        let window = ForecastWindow::new(3, 2);
        let k = kernel(2, window, 0);
        let mask = k.edge_mask(&Array2::zeros((5, 5))).unwrap();
        assert!(mask.iter().all(|&keep| keep));
    }

    #[test]
    fn test_fully_masked_row_propagates_nan() {
        let window = ForecastWindow::new(3, 2);
        let k = kernel(2, window, 1);
        let x = features(1, window, 2, 1);
        let keep = array![[true, false, true], [false, false, false]];

        let alpha = k.attention_with_mask(&x, keep.view()).unwrap();
        assert!((alpha.slice(s![0, 0, ..]).sum() - 1.0).abs() < 1e-5);
        assert!(alpha.slice(s![0, 1, ..]).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_fully_masked_row_uniform_policy() {
        let window = ForecastWindow::new(4, 1);
        let settings = KernelSettings {
            masked_rows: MaskedRowPolicy::Uniform,
            // Every normalized weight is 0.25, so everything is dropped.
            threshold: 0.5,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let k = KernelAttention::new(2, 2, window, settings, &mut rng);
        let x = features(2, window, 2, 3);
        let y = Array3::from_shape_fn((2, 4, 1), |(_, p, _)| p as f32);

        let alpha = k.attention(&x, &uniform_cross(window)).unwrap();
        assert!(alpha.iter().all(|&v| (v - 0.25).abs() < 1e-6));

        let out = k.forward(&x, &y, &uniform_cross(window)).unwrap();
        assert!((out[[0, 0, 0]] - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_fully_masked_row_default_policy_is_nan() {
        let window = ForecastWindow::new(4, 1);
        let settings = KernelSettings {
            threshold: 0.5,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let k = KernelAttention::new(2, 2, window, settings, &mut rng);
        let x = features(1, window, 2, 3);
        let alpha = k.attention(&x, &uniform_cross(window)).unwrap();
        assert!(alpha.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_shape_errors() {
        let window = ForecastWindow::new(4, 2);
        let k = kernel(3, window, 0);
        let adjacency = uniform_cross(window);

        let wrong_time = Array3::zeros((1, 5, 3));
        assert!(k.scores(&wrong_time).is_err());

        let wrong_width = Array3::zeros((1, 6, 4));
        assert!(k.scores(&wrong_width).is_err());

        let x = Array3::zeros((1, 6, 3));
        assert!(k.forward(&x, &Array3::zeros((1, 3, 1)), &adjacency).is_err());
        assert!(k.forward(&x, &Array3::zeros((2, 4, 1)), &adjacency).is_err());
        assert!(k.forward(&x, &Array3::zeros((1, 4, 1)), &Array2::zeros((5, 5))).is_err());
    }

    #[test]
    fn test_parameters_roundtrip() {
        let window = ForecastWindow::new(4, 2);
        let k = kernel(3, window, 0);
        let state = k.state_dict();
        assert_eq!(state.get("smoothing").unwrap().shape, vec![1]);

        let mut other = kernel(3, window, 1);
        other.load_parameters("", &state).unwrap();
        assert_eq!(other.theta(), k.theta());
        assert_eq!(other.temperature(), k.temperature());
    }

    #[test]
    fn test_temperature_range() {
        let window = ForecastWindow::new(2, 1);
        let hot = KernelAttention::from_parts(Array2::eye(1), 50.0, window, KernelSettings::default());
        let cold = KernelAttention::from_parts(Array2::eye(1), -50.0, window, KernelSettings::default());
        assert!(hot.temperature() <= 0.01);
        assert!(cold.temperature() >= 0.0);
    }
}
