//! Learned temporal adjacency.
//!
//! Time steps are graph nodes. Edge weights come from a low-rank factor
//! `M` as `relu(M Mᵀ)`, restricted to strictly causal edges (a node only
//! sees earlier nodes) and row-normalized with a softmax.

use crate::checkpoint::StateDict;
use crate::core::{Error, ForecastWindow, Result};
use crate::nn::{masked_softmax, param_name, relu, Module};
use ndarray::{s, Array2, ArrayView2, Zip};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use tracing::trace;

/// Strictly lower-triangular mask: `mask[i, j]` is true iff `j < i`.
pub fn causal_mask(n: usize) -> Array2<bool> {
    Array2::from_shape_fn((n, n), |(i, j)| j < i)
}

/// Adjacency over `past + future` nodes built from a learned factor.
#[derive(Clone, Debug)]
pub struct LearnedAdjacency {
    window: ForecastWindow,
    factor: Array2<f32>,
}

impl LearnedAdjacency {
    /// Create with a standard-normal factor of shape `(N, N / 3)`.
    pub fn new<R: Rng + ?Sized>(window: ForecastWindow, rng: &mut R) -> Result<Self> {
        let n = window.total();
        let rank = n / 3;
        if rank == 0 {
            return Err(Error::InvalidConfig(format!(
                "window of {} steps is too short for a learned adjacency (need at least 3)",
                n
            )));
        }
        let factor: Array2<f32> = Array2::from_shape_fn((n, rank), |_| StandardNormal.sample(rng));
        Ok(Self { window, factor })
    }

    /// Create from an explicit factor.
    pub fn from_factor(window: ForecastWindow, factor: Array2<f32>) -> Result<Self> {
        if factor.nrows() != window.total() || factor.ncols() == 0 {
            return Err(Error::shape(
                "adjacency factor",
                &[window.total(), window.total() / 3],
                factor.shape(),
            ));
        }
        Ok(Self { window, factor })
    }

    /// The window this adjacency spans.
    pub fn window(&self) -> ForecastWindow {
        self.window
    }

    /// The learned factor `M`.
    pub fn factor(&self) -> &Array2<f32> {
        &self.factor
    }

    /// Build the normalized adjacency.
    ///
    /// Every row with at least one earlier node sums to 1; entries outside
    /// the causal mask are 0, so row 0 is all zeros.
    pub fn build(&self) -> Array2<f32> {
        let n = self.window.total();
        let raw = relu(&self.factor.dot(&self.factor.t()));
        let mask = causal_mask(n);

        let mut adjacency = masked_softmax(&raw, &mask);
        Zip::from(&mut adjacency).and(&mask).for_each(|v, &keep| {
            if !keep {
                *v = 0.0;
            }
        });

        trace!(nodes = n, rank = self.factor.ncols(), "built adjacency");
        adjacency
    }
}

impl Module for LearnedAdjacency {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        state.insert(&param_name(prefix, "M"), &self.factor);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.factor = state.array2(&param_name(prefix, "M"), self.factor.dim())?;
        Ok(())
    }
}

/// Edges among past nodes, `(P, P)`.
pub fn past_block(adjacency: &Array2<f32>, window: ForecastWindow) -> ArrayView2<'_, f32> {
    adjacency.slice(s![..window.past, ..window.past])
}

/// Edges among future nodes, `(F, F)`.
pub fn future_block(adjacency: &Array2<f32>, window: ForecastWindow) -> ArrayView2<'_, f32> {
    adjacency.slice(s![window.past.., window.past..])
}

/// Edges from past nodes into future nodes, `(F, P)`.
pub fn cross_block(adjacency: &Array2<f32>, window: ForecastWindow) -> ArrayView2<'_, f32> {
    adjacency.slice(s![window.past.., ..window.past])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn adjacency(past: usize, future: usize, seed: u64) -> LearnedAdjacency {
        let mut rng = StdRng::seed_from_u64(seed);
        LearnedAdjacency::new(ForecastWindow::new(past, future), &mut rng).unwrap()
    }

    #[test]
    fn test_causal_mask() {
        let mask = causal_mask(3);
        assert!(!mask[[0, 0]]);
        assert!(mask[[1, 0]]);
        assert!(!mask[[1, 1]]);
        assert!(!mask[[0, 2]]);
        assert!(mask[[2, 1]]);
    }

    #[test]
    fn test_factor_shape() {
        let adj = adjacency(8, 4, 0);
        assert_eq!(adj.factor().dim(), (12, 4));
    }

    #[test]
    fn test_rows_sum_to_one() {
        for seed in 0..5 {
            let a = adjacency(10, 5, seed).build();
            assert!(a.row(0).iter().all(|&v| v == 0.0));
            for i in 1..a.nrows() {
                let sum: f32 = a.row(i).sum();
                assert!((sum - 1.0).abs() < 1e-5, "row {} sums to {}", i, sum);
            }
        }
    }

    #[test]
    fn test_no_self_loops_or_future_edges() {
        let a = adjacency(6, 3, 11).build();
        for i in 0..a.nrows() {
            for j in i..a.ncols() {
                assert_eq!(a[[i, j]], 0.0);
            }
        }
    }

    #[test]
    fn test_blocks() {
        let window = ForecastWindow::new(4, 2);
        let a = adjacency(4, 2, 3).build();
        assert_eq!(past_block(&a, window).dim(), (4, 4));
        assert_eq!(future_block(&a, window).dim(), (2, 2));
        assert_eq!(cross_block(&a, window).dim(), (2, 4));
        assert_eq!(cross_block(&a, window)[[1, 3]], a[[5, 3]]);
    }

    #[test]
    fn test_window_too_short() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = LearnedAdjacency::new(ForecastWindow::new(1, 1), &mut rng);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_parameters_roundtrip() {
        let adj = adjacency(4, 2, 1);
        let state = adj.state_dict();
        assert!(state.contains("M"));

        let mut other = adjacency(4, 2, 2);
        other.load_parameters("", &state).unwrap();
        assert_eq!(other.build(), adj.build());
    }
}
