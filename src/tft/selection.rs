//! Variable selection network.

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::{param_name, Module};
use crate::tft::gating::{FlattenGrn, Grn};
use ndarray::{s, Array3, Array4, Axis};
use rand::Rng;

/// Weights embedded variables per step and averages them.
///
/// Each variable goes through its own GRN; a flattened GRN over all
/// variables yields the selection weights.
#[derive(Clone, Debug)]
pub struct VariableSelection {
    d_model: usize,
    grns_cat: Vec<Grn>,
    grns_num: Option<Vec<Grn>>,
    flatten_grn: FlattenGrn,
}

impl VariableSelection {
    /// Create for `n_cat` categorical variables and optionally `n_target`
    /// embedded target variables.
    pub fn new<R: Rng + ?Sized>(
        n_cat: usize,
        n_target: Option<usize>,
        d_model: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let total = n_cat + n_target.unwrap_or(0);
        if total == 0 || d_model == 0 {
            return Err(Error::InvalidConfig(
                "variable selection needs at least one variable and a positive width".to_string(),
            ));
        }

        let grns_cat = (0..n_cat).map(|_| Grn::new(d_model, rng)).collect();
        let grns_num = n_target.map(|n| (0..n).map(|_| Grn::new(d_model, rng)).collect());
        let flatten_grn = FlattenGrn::new([d_model * total, (d_model + total) / 2, total], rng)?;

        Ok(Self {
            d_model,
            grns_cat,
            grns_num,
            flatten_grn,
        })
    }

    /// Number of variables selected over.
    pub fn num_variables(&self) -> usize {
        self.grns_cat.len() + self.grns_num.as_ref().map_or(0, Vec::len)
    }

    fn check_input(&self, name: &str, x: &Array4<f32>, vars: usize) -> Result<()> {
        let (batch, time, n, d) = x.dim();
        if n != vars || d != self.d_model {
            return Err(Error::shape(name, &[batch, time, vars, self.d_model], x.shape()));
        }
        Ok(())
    }

    fn stacked(
        &self,
        categorical: &Array4<f32>,
        target: Option<&Array4<f32>>,
    ) -> Result<(Array4<f32>, Array4<f32>)> {
        self.check_input("selection categorical", categorical, self.grns_cat.len())?;
        let inputs: Vec<(&Array4<f32>, &[Grn])> = match (target, &self.grns_num) {
            (None, _) => vec![(categorical, self.grns_cat.as_slice())],
            (Some(y), Some(grns)) => {
                self.check_input("selection target", y, grns.len())?;
                if y.dim().0 != categorical.dim().0 || y.dim().1 != categorical.dim().1 {
                    return Err(Error::shape("selection target", categorical.shape(), y.shape()));
                }
                vec![(categorical, self.grns_cat.as_slice()), (y, grns.as_slice())]
            }
            (Some(_), None) => {
                return Err(Error::InvalidConfig(
                    "target variables passed to a selection built without target GRNs".to_string(),
                ))
            }
        };

        let (batch, time, _, d) = categorical.dim();
        let total: usize = inputs.iter().map(|(_, grns)| grns.len()).sum();
        let mut raw = Array4::zeros((batch, time, total, d));
        let mut selected = Array4::zeros((batch, time, total, d));
        let mut v = 0;
        for (x, grns) in inputs {
            for (i, grn) in grns.iter().enumerate() {
                let var = x.slice(s![.., .., i, ..]).to_owned();
                selected.slice_mut(s![.., .., v, ..]).assign(&grn.forward(&var)?);
                raw.slice_mut(s![.., .., v, ..]).assign(&var);
                v += 1;
            }
        }
        Ok((raw, selected))
    }

    fn weights_of(&self, raw: &Array4<f32>) -> Result<Array3<f32>> {
        let (batch, time, n, d) = raw.dim();
        let flat = Array3::from_shape_vec((batch, time, n * d), raw.iter().copied().collect())
            .map_err(|e| Error::Internal(format!("selection flatten: {}", e)))?;
        self.flatten_grn.forward(&flat)
    }

    /// Selection weights `(batch, time, variables)`, summing to 1 per step.
    pub fn selection_weights(
        &self,
        categorical: &Array4<f32>,
        target: Option<&Array4<f32>>,
    ) -> Result<Array3<f32>> {
        let (raw, _) = self.stacked(categorical, target)?;
        self.weights_of(&raw)
    }

    /// Select over `(batch, time, n_cat, d_model)` and optionally
    /// `(batch, time, n_target, d_model)`, giving `(batch, time, d_model)`.
    pub fn forward(
        &self,
        categorical: &Array4<f32>,
        target: Option<&Array4<f32>>,
    ) -> Result<Array3<f32>> {
        let (raw, mut selected) = self.stacked(categorical, target)?;
        let weights = self.weights_of(&raw)?;
        let total = selected.dim().2 as f32;

        for ((b, t, v), &w) in weights.indexed_iter() {
            selected.slice_mut(s![b, t, v, ..]).mapv_inplace(|x| x * w);
        }
        Ok(selected.sum_axis(Axis(2)) / total)
    }
}

impl Module for VariableSelection {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        let cat = param_name(prefix, "grns_cat");
        for (i, grn) in self.grns_cat.iter().enumerate() {
            grn.collect_parameters(&param_name(&cat, &i.to_string()), state);
        }
        if let Some(grns) = &self.grns_num {
            let num = param_name(prefix, "grns_num");
            for (i, grn) in grns.iter().enumerate() {
                grn.collect_parameters(&param_name(&num, &i.to_string()), state);
            }
        }
        self.flatten_grn
            .collect_parameters(&param_name(prefix, "flatten_grn"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        let cat = param_name(prefix, "grns_cat");
        for (i, grn) in self.grns_cat.iter_mut().enumerate() {
            grn.load_parameters(&param_name(&cat, &i.to_string()), state)?;
        }
        if let Some(grns) = &mut self.grns_num {
            let num = param_name(prefix, "grns_num");
            for (i, grn) in grns.iter_mut().enumerate() {
                grn.load_parameters(&param_name(&num, &i.to_string()), state)?;
            }
        }
        self.flatten_grn
            .load_parameters(&param_name(prefix, "flatten_grn"), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn variables(batch: usize, time: usize, n: usize, d: usize) -> Array4<f32> {
        Array4::from_shape_fn((batch, time, n, d), |(b, t, v, c)| {
            ((b * 11 + t * 5 + v * 3 + c) as f32 * 0.21).cos()
        })
    }

    #[test]
    fn test_forward_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let vs = VariableSelection::new(3, None, 4, &mut rng).unwrap();
        let out = vs.forward(&variables(2, 5, 3, 4), None).unwrap();
        assert_eq!(out.dim(), (2, 5, 4));
        assert_eq!(vs.num_variables(), 3);
    }

    #[test]
    fn test_weights_normalized() {
        let mut rng = StdRng::seed_from_u64(1);
        let vs = VariableSelection::new(2, Some(1), 4, &mut rng).unwrap();
        let cat = variables(2, 3, 2, 4);
        let y = variables(2, 3, 1, 4);

        let w = vs.selection_weights(&cat, Some(&y)).unwrap();
        assert_eq!(w.dim(), (2, 3, 3));
        for lane in w.lanes(Axis(2)) {
            assert!((lane.sum() - 1.0).abs() < 1e-5);
        }
        assert_eq!(vs.forward(&cat, Some(&y)).unwrap().dim(), (2, 3, 4));
    }

    #[test]
    fn test_matches_manual_weighting() {
        let mut rng = StdRng::seed_from_u64(2);
        let vs = VariableSelection::new(2, None, 3, &mut rng).unwrap();
        let cat = variables(1, 2, 2, 3);

        let out = vs.forward(&cat, None).unwrap();
        let w = vs.selection_weights(&cat, None).unwrap();
        let g0 = vs.grns_cat[0].forward(&cat.slice(s![.., .., 0, ..]).to_owned()).unwrap();
        let g1 = vs.grns_cat[1].forward(&cat.slice(s![.., .., 1, ..]).to_owned()).unwrap();

        for t in 0..2 {
            for c in 0..3 {
                let expected = (g0[[0, t, c]] * w[[0, t, 0]] + g1[[0, t, c]] * w[[0, t, 1]]) / 2.0;
                assert!((out[[0, t, c]] - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_target_without_target_grns() {
        let mut rng = StdRng::seed_from_u64(3);
        let vs = VariableSelection::new(2, None, 4, &mut rng).unwrap();
        let result = vs.forward(&variables(1, 2, 2, 4), Some(&variables(1, 2, 1, 4)));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_wrong_variable_count() {
        let mut rng = StdRng::seed_from_u64(4);
        let vs = VariableSelection::new(2, None, 4, &mut rng).unwrap();
        assert!(matches!(
            vs.forward(&variables(1, 2, 3, 4), None),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_parameter_names() {
        let mut rng = StdRng::seed_from_u64(5);
        let vs = VariableSelection::new(1, Some(1), 2, &mut rng).unwrap();
        let state = vs.state_dict();
        assert!(state.contains("grns_cat.0.linear1.weight"));
        assert!(state.contains("grns_num.0.norm.weight"));
        assert!(state.contains("flatten_grn.res_conn.weight"));
    }
}
