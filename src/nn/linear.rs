//! Linear projections and embedding tables.

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::module::{param_name, Module};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};
use serde::{Deserialize, Serialize};

/// Affine map `y = x W + b` over the last axis.
///
/// The weight is stored as `(in_dim, out_dim)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    /// Create a layer with uniform `U(-1/sqrt(in), 1/sqrt(in))` initialization.
    pub fn new<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, bias: bool, rng: &mut R) -> Self {
        let bound = 1.0 / (in_dim.max(1) as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);

        let weight = Array2::from_shape_fn((in_dim, out_dim), |_| dist.sample(rng));
        let bias = if bias {
            Some(Array1::from_shape_fn(out_dim, |_| dist.sample(rng)))
        } else {
            None
        };

        Self { weight, bias }
    }

    /// Create a layer from explicit parameters.
    pub fn from_parts(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        if let Some(b) = &bias {
            if b.len() != weight.ncols() {
                return Err(Error::shape("linear bias", &[weight.ncols()], &[b.len()]));
            }
        }
        Ok(Self { weight, bias })
    }

    /// Input width.
    pub fn in_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// Output width.
    pub fn out_dim(&self) -> usize {
        self.weight.ncols()
    }

    /// Weight matrix `(in_dim, out_dim)`.
    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    /// Forward pass on `(rows, in_dim)`.
    pub fn forward2(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.in_dim() {
            return Err(Error::shape(
                "linear input",
                &[x.nrows(), self.in_dim()],
                x.shape(),
            ));
        }
        let mut out = x.dot(&self.weight);
        if let Some(b) = &self.bias {
            out += b;
        }
        Ok(out)
    }

    /// Forward pass on `(batch, time, in_dim)`.
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, time, _) = x.dim();
        let mut out = Array3::zeros((batch, time, self.out_dim()));
        for (xb, mut ob) in x.outer_iter().zip(out.outer_iter_mut()) {
            ob.assign(&self.forward2(xb)?);
        }
        Ok(out)
    }
}

impl Module for Linear {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        state.insert(&param_name(prefix, "weight"), &self.weight);
        if let Some(b) = &self.bias {
            state.insert(&param_name(prefix, "bias"), b);
        }
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.weight = state.array2(&param_name(prefix, "weight"), self.weight.dim())?;
        if let Some(b) = &self.bias {
            self.bias = Some(state.array1(&param_name(prefix, "bias"), b.len())?);
        }
        Ok(())
    }
}

/// Lookup table mapping a category index to a dense vector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Embedding {
    table: Array2<f32>,
}

impl Embedding {
    /// Create a table with standard-normal entries.
    pub fn new<R: Rng + ?Sized>(cardinality: usize, dim: usize, rng: &mut R) -> Self {
        let table: Array2<f32> =
            Array2::from_shape_fn((cardinality, dim), |_| StandardNormal.sample(rng));
        Self { table }
    }

    /// Number of categories.
    pub fn cardinality(&self) -> usize {
        self.table.nrows()
    }

    /// Embedding width.
    pub fn dim(&self) -> usize {
        self.table.ncols()
    }

    /// Vector for a category, if in range.
    pub fn lookup(&self, index: usize) -> Option<ArrayView1<'_, f32>> {
        if index < self.cardinality() {
            Some(self.table.row(index))
        } else {
            None
        }
    }
}

impl Module for Embedding {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        state.insert(&param_name(prefix, "weight"), &self.table);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.table = state.array2(&param_name(prefix, "weight"), self.table.dim())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_creation() {
        let mut rng = StdRng::seed_from_u64(7);
        let lin = Linear::new(8, 4, true, &mut rng);
        assert_eq!(lin.in_dim(), 8);
        assert_eq!(lin.out_dim(), 4);
        let bound = 1.0 / 8f32.sqrt();
        assert!(lin.weight().iter().all(|w| w.abs() <= bound));
    }

    #[test]
    fn test_linear_forward_values() {
        let lin = Linear::from_parts(array![[1.0f32, 0.0], [0.0, 2.0]], Some(array![0.5, -0.5]))
            .unwrap();
        let out = lin.forward2(array![[1.0f32, 1.0], [2.0, 3.0]].view()).unwrap();
        assert_eq!(out, array![[1.5f32, 1.5], [2.5, 5.5]]);
    }

    #[test]
    fn test_linear_forward_3d() {
        let mut rng = StdRng::seed_from_u64(1);
        let lin = Linear::new(3, 5, false, &mut rng);
        let x = Array3::<f32>::ones((2, 4, 3));
        let out = lin.forward(&x).unwrap();
        assert_eq!(out.dim(), (2, 4, 5));
    }

    #[test]
    fn test_linear_rejects_wrong_width() {
        let mut rng = StdRng::seed_from_u64(1);
        let lin = Linear::new(3, 5, false, &mut rng);
        let x = Array3::<f32>::ones((2, 4, 2));
        assert!(matches!(lin.forward(&x), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_linear_bias_shape_checked() {
        let result = Linear::from_parts(Array2::zeros((2, 3)), Some(Array1::zeros(2)));
        assert!(result.is_err());
    }

    #[test]
    fn test_linear_parameters() {
        let mut rng = StdRng::seed_from_u64(3);
        let lin = Linear::new(4, 2, true, &mut rng);
        let state = lin.state_dict();
        assert_eq!(state.len(), 2);
        assert_eq!(lin.num_parameters(), 4 * 2 + 2);

        let mut other = Linear::new(4, 2, true, &mut rng);
        other.load_parameters("", &state).unwrap();
        assert_eq!(other.weight(), lin.weight());
    }

    #[test]
    fn test_embedding_lookup() {
        let mut rng = StdRng::seed_from_u64(2);
        let emb = Embedding::new(5, 3, &mut rng);
        assert_eq!(emb.cardinality(), 5);
        assert_eq!(emb.dim(), 3);
        assert_eq!(emb.lookup(4).unwrap().len(), 3);
        assert!(emb.lookup(5).is_none());
    }
}
