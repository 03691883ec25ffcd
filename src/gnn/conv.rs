//! One-hop graph convolution over time-step nodes.
//!
//! Implements `act(D · Â · D · (x W))` where `D` is the inverse square root
//! of (1 + number of positive edges per row).

use crate::checkpoint::StateDict;
use crate::core::{Error, Result};
use crate::nn::{param_name, Activation, Linear, Module};
use ndarray::{Array1, Array2, Array3, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Edges at or below this weight do not count towards a node's degree.
pub const EDGE_EPSILON: f32 = 1e-15;

/// Which adjacency is propagated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Propagation {
    /// Propagate `A` itself; the degree still counts one self loop.
    Raw,
    /// Propagate `A + I`.
    SelfLooped,
}

impl Default for Propagation {
    fn default() -> Self {
        Self::Raw
    }
}

/// Diagonal of `D = diag((1 + Σ_j [A_ij > eps])^(-1/2))`.
pub fn degree_normalizer(adjacency: ArrayView2<'_, f32>, eps: f32) -> Array1<f32> {
    adjacency
        .rows()
        .into_iter()
        .map(|row| {
            let edges = row.iter().filter(|&&v| v - eps > 0.0).count();
            (1.0 + edges as f32).powf(-0.5)
        })
        .collect()
}

/// The normalized propagation operator `D · Â · D`.
pub fn propagation_operator(adjacency: ArrayView2<'_, f32>, propagation: Propagation) -> Array2<f32> {
    let degree = degree_normalizer(adjacency, EDGE_EPSILON);
    let mut operator = match propagation {
        Propagation::Raw => adjacency.to_owned(),
        Propagation::SelfLooped => &adjacency + &Array2::<f32>::eye(adjacency.nrows()),
    };
    for ((i, j), v) in operator.indexed_iter_mut() {
        *v *= degree[i] * degree[j];
    }
    operator
}

/// Shape and activation of one convolution layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Input feature width
    pub in_dim: usize,
    /// Output feature width
    pub out_dim: usize,
    /// Activation after propagation
    pub activation: Activation,
}

/// Plan the layers of a convolution stack.
///
/// Zero or one layer maps `in_dim → out_dim` directly without activation.
/// Deeper stacks go `in_dim → hidden` and `hidden → hidden` with ReLU and
/// end with `hidden → out_dim` without activation.
pub fn layer_plan(
    in_dim: usize,
    out_dim: usize,
    num_layers: usize,
    hidden: Option<usize>,
) -> Result<Vec<LayerSpec>> {
    if num_layers <= 1 {
        return Ok(vec![LayerSpec {
            in_dim,
            out_dim,
            activation: Activation::Identity,
        }]);
    }

    let hidden = hidden.ok_or_else(|| {
        Error::InvalidConfig(format!(
            "a {}-layer graph convolution stack needs a hidden width",
            num_layers
        ))
    })?;

    let mut plan = Vec::with_capacity(num_layers);
    plan.push(LayerSpec {
        in_dim,
        out_dim: hidden,
        activation: Activation::Relu,
    });
    for _ in 0..num_layers - 2 {
        plan.push(LayerSpec {
            in_dim: hidden,
            out_dim: hidden,
            activation: Activation::Relu,
        });
    }
    plan.push(LayerSpec {
        in_dim: hidden,
        out_dim,
        activation: Activation::Identity,
    });
    Ok(plan)
}

/// A single graph convolution layer.
#[derive(Clone, Debug)]
pub struct GraphConv {
    lin: Linear,
    nodes: usize,
    activation: Activation,
    propagation: Propagation,
}

impl GraphConv {
    /// Create a layer with a bias-free projection.
    pub fn new<R: Rng + ?Sized>(
        spec: LayerSpec,
        nodes: usize,
        propagation: Propagation,
        rng: &mut R,
    ) -> Self {
        Self {
            lin: Linear::new(spec.in_dim, spec.out_dim, false, rng),
            nodes,
            activation: spec.activation,
            propagation,
        }
    }

    /// Create a layer from an explicit projection.
    pub fn from_parts(
        lin: Linear,
        nodes: usize,
        activation: Activation,
        propagation: Propagation,
    ) -> Self {
        Self {
            lin,
            nodes,
            activation,
            propagation,
        }
    }

    /// Input feature width.
    pub fn in_dim(&self) -> usize {
        self.lin.in_dim()
    }

    /// Output feature width.
    pub fn out_dim(&self) -> usize {
        self.lin.out_dim()
    }

    /// Forward pass: `x` is `(batch, nodes, in_dim)`, `adjacency` is `(nodes, nodes)`.
    pub fn forward(&self, x: &Array3<f32>, adjacency: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        if adjacency.dim() != (self.nodes, self.nodes) {
            return Err(Error::shape(
                "graph conv adjacency",
                &[self.nodes, self.nodes],
                adjacency.shape(),
            ));
        }
        let (batch, nodes, _) = x.dim();
        if nodes != self.nodes {
            return Err(Error::shape(
                "graph conv input",
                &[batch, self.nodes, self.in_dim()],
                x.shape(),
            ));
        }

        let operator = propagation_operator(adjacency, self.propagation);
        let projected = self.lin.forward(x)?;

        let mut out = Array3::zeros((batch, nodes, self.out_dim()));
        for (hb, mut ob) in projected.outer_iter().zip(out.outer_iter_mut()) {
            ob.assign(&operator.dot(&hb));
        }
        Ok(self.activation.apply(out))
    }
}

impl Module for GraphConv {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.lin.collect_parameters(&param_name(prefix, "lin"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.lin.load_parameters(&param_name(prefix, "lin"), state)
    }
}

/// An ordered sequence of graph convolutions sharing one adjacency.
#[derive(Clone, Debug)]
pub struct GraphConvStack {
    layers: Vec<GraphConv>,
}

impl GraphConvStack {
    /// Build the layers described by `plan`.
    pub fn new<R: Rng + ?Sized>(
        plan: &[LayerSpec],
        nodes: usize,
        propagation: Propagation,
        rng: &mut R,
    ) -> Result<Self> {
        if plan.is_empty() {
            return Err(Error::InvalidConfig("empty graph convolution plan".to_string()));
        }
        let layers = plan
            .iter()
            .map(|spec| GraphConv::new(*spec, nodes, propagation, rng))
            .collect();
        Ok(Self { layers })
    }

    /// Number of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Layers in application order.
    pub fn layers(&self) -> &[GraphConv] {
        &self.layers
    }

    /// Apply every layer in order.
    pub fn forward(&self, x: &Array3<f32>, adjacency: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.forward(&h, adjacency)?;
        }
        Ok(h)
    }
}

impl Module for GraphConvStack {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.collect_parameters(&param_name(prefix, &i.to_string()), state);
        }
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.load_parameters(&param_name(prefix, &i.to_string()), state)?;
        }
        Ok(())
    }
}
