//! Kernel GNN forecaster.
//!
//! The past subgraph is encoded by a graph convolution stack, the kernel
//! attention carries past targets over to the future nodes, and a second
//! stack on the future subgraph produces one prediction per future step.

use crate::checkpoint::{Checkpoint, StateDict};
use crate::core::{Error, Result};
use crate::gnn::adjacency::{future_block, past_block, LearnedAdjacency};
use crate::gnn::config::GnnConfig;
use crate::gnn::conv::{layer_plan, GraphConvStack};
use crate::gnn::kernel::KernelAttention;
use crate::gnn::preprocessing::Preprocessor;
use crate::nn::{param_name, Module};
use ndarray::{concatenate, s, Array2, Array3, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::debug;

/// Model kind recorded in checkpoints.
pub const MODEL_KIND: &str = "kernel-gnn";

/// Result of a forward pass.
#[derive(Clone, Debug)]
pub struct ForecastOutput {
    /// One value per future step, `(batch, future)`
    pub predictions: Array2<f32>,
    /// Euclidean distances between all node embeddings, `(batch, N, N)`
    pub distances: Array3<f32>,
    /// Adjacency used for this pass, `(N, N)`
    pub adjacency: Array2<f32>,
}

/// Past-graph encoding shared by the forward pass and attention inspection.
struct Encoded {
    adjacency: Array2<f32>,
    /// Preprocessed past nodes, `(batch, past, O)`
    past: Array3<f32>,
    /// Future node features without the target column, `(batch, future, O - 1)`
    future: Array3<f32>,
    /// Encoded past followed by future features, `(batch, N, O - 1)`
    kernel_input: Array3<f32>,
    /// Past targets, `(batch, past, 1)`
    targets: Array3<f32>,
}

/// Graph forecaster with a learned temporal adjacency.
#[derive(Clone, Debug)]
pub struct KernelGnn {
    config: GnnConfig,
    pre_processing: Preprocessor,
    adjacency: LearnedAdjacency,
    gnn1: GraphConvStack,
    kernel: KernelAttention,
    gnn2: GraphConvStack,
}

impl KernelGnn {
    /// Build a randomly initialized model.
    pub fn new<R: Rng + ?Sized>(config: GnnConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let window = config.window;
        let features = config.node_features();

        let pre_processing =
            Preprocessor::new(&config.categorical, config.preprocess_hidden, rng)?;
        let adjacency = LearnedAdjacency::new(window, rng)?;

        let plan1 = layer_plan(features, features - 1, config.num_layer1, config.hid_out_features1)?;
        let gnn1 = GraphConvStack::new(&plan1, window.past, config.propagation, rng)?;

        let kernel = KernelAttention::new(
            features - 1,
            config.kernel_hidden,
            window,
            config.kernel.clone(),
            rng,
        );

        let plan2 = layer_plan(features, 1, config.num_layer2, config.hid_out_features2)?;
        let gnn2 = GraphConvStack::new(&plan2, window.future, config.propagation, rng)?;

        debug!(
            past = window.past,
            future = window.future,
            features,
            gnn1_depth = gnn1.depth(),
            gnn2_depth = gnn2.depth(),
            "built kernel gnn"
        );

        Ok(Self {
            config,
            pre_processing,
            adjacency,
            gnn1,
            kernel,
            gnn2,
        })
    }

    /// Configuration the model was built from.
    pub fn config(&self) -> &GnnConfig {
        &self.config
    }

    /// Current normalized adjacency.
    pub fn adjacency(&self) -> Array2<f32> {
        self.adjacency.build()
    }

    /// Kernel attention component.
    pub fn kernel(&self) -> &KernelAttention {
        &self.kernel
    }

    fn encode(&self, raw: &Array3<f32>) -> Result<Encoded> {
        let window = self.config.window;
        let (batch, time, columns) = raw.dim();
        if time != window.total() || columns != self.config.raw_features() {
            return Err(Error::shape(
                "model input",
                &[batch, window.total(), self.config.raw_features()],
                raw.shape(),
            ));
        }

        let adjacency = self.adjacency.build();
        let x = self.pre_processing.forward(raw)?;
        let features = x.dim().2;

        let past = x.slice(s![.., ..window.past, ..]).to_owned();
        let future = x.slice(s![.., window.past.., ..features - 1]).to_owned();
        let targets = x.slice(s![.., ..window.past, features - 1..]).to_owned();

        let x1 = self.gnn1.forward(&past, past_block(&adjacency, window))?;
        let kernel_input = concat(Axis(1), &[x1.view(), future.view()])?;

        Ok(Encoded {
            adjacency,
            past,
            future,
            kernel_input,
            targets,
        })
    }

    /// Run the model on raw input `(batch, past + future, raw_features)`.
    ///
    /// Categorical columns come first, then the numeric columns with the
    /// target last. Future target values still reach the preprocessing MLP,
    /// so callers should blank them.
    pub fn forward(&self, raw: &Array3<f32>) -> Result<ForecastOutput> {
        let window = self.config.window;
        let encoded = self.encode(raw)?;

        let yh = self
            .kernel
            .forward(&encoded.kernel_input, &encoded.targets, &encoded.adjacency)?;
        let x2 = concat(Axis(2), &[encoded.future.view(), yh.view()])?;

        let out = self
            .gnn2
            .forward(&x2, future_block(&encoded.adjacency, window))?;
        let batch = out.dim().0;
        let predictions = Array2::from_shape_vec((batch, window.future), out.iter().copied().collect())
            .map_err(|e| Error::Internal(format!("prediction reshape: {}", e)))?;

        let nodes = concat(Axis(1), &[encoded.past.view(), x2.view()])?;
        let distances = pairwise_distances(&nodes);

        debug!(batch, future = window.future, "kernel gnn forward");
        Ok(ForecastOutput {
            predictions,
            distances,
            adjacency: encoded.adjacency,
        })
    }

    /// Kernel attention weights for raw input, `(batch, future, past)`.
    pub fn attention_weights(&self, raw: &Array3<f32>) -> Result<Array3<f32>> {
        let encoded = self.encode(raw)?;
        self.kernel
            .attention(&encoded.kernel_input, &encoded.adjacency)
    }

    /// Snapshot parameters and configuration.
    pub fn to_checkpoint(&self) -> Result<Checkpoint> {
        Ok(Checkpoint::new(
            MODEL_KIND,
            self.config.to_json()?,
            self.state_dict(),
        ))
    }

    /// Rebuild a model from a checkpoint.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        if checkpoint.meta.model != MODEL_KIND {
            return Err(Error::InvalidConfig(format!(
                "checkpoint holds a '{}' model, expected '{}'",
                checkpoint.meta.model, MODEL_KIND
            )));
        }
        let config = GnnConfig::from_json_str(&checkpoint.meta.config_json)?;
        // Every parameter is overwritten below; the seed only fixes shapes.
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = Self::new(config, &mut rng)?;
        model.load_parameters("", &checkpoint.state)?;
        Ok(model)
    }

    /// Save a checkpoint to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_checkpoint()?.save(path)
    }

    /// Load a model from a checkpoint file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_checkpoint(&Checkpoint::load(path)?)
    }
}

impl Module for KernelGnn {
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict) {
        self.pre_processing
            .collect_parameters(&param_name(prefix, "pre_processing"), state);
        self.adjacency.collect_parameters(prefix, state);
        self.gnn1.collect_parameters(&param_name(prefix, "gnn1"), state);
        self.kernel.collect_parameters(&param_name(prefix, "kernel"), state);
        self.gnn2.collect_parameters(&param_name(prefix, "gnn2"), state);
    }

    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.pre_processing
            .load_parameters(&param_name(prefix, "pre_processing"), state)?;
        self.adjacency.load_parameters(prefix, state)?;
        self.gnn1.load_parameters(&param_name(prefix, "gnn1"), state)?;
        self.kernel.load_parameters(&param_name(prefix, "kernel"), state)?;
        self.gnn2.load_parameters(&param_name(prefix, "gnn2"), state)?;
        Ok(())
    }
}

fn concat(axis: Axis, parts: &[ArrayView3<'_, f32>]) -> Result<Array3<f32>> {
    concatenate(axis, parts).map_err(|e| Error::Internal(format!("concatenate: {}", e)))
}

/// Euclidean distance between every pair of nodes, per batch.
///
/// `x` is `(batch, nodes, features)`; the result is `(batch, nodes, nodes)`.
pub fn pairwise_distances(x: &Array3<f32>) -> Array3<f32> {
    let (batch, nodes, _) = x.dim();
    let mut out = Array3::zeros((batch, nodes, nodes));
    for (xb, mut ob) in x.outer_iter().zip(out.outer_iter_mut()) {
        for i in 0..nodes {
            for j in (i + 1)..nodes {
                let d = (&xb.row(i) - &xb.row(j)).mapv(|v| v * v).sum().sqrt();
                ob[[i, j]] = d;
                ob[[j, i]] = d;
            }
        }
    }
    out
}
