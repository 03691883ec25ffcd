//! Graph Neural Network (GNN) Module
//!
//! Time steps of a forecast window are graph nodes:
//! - Learned causal adjacency over past and future steps
//! - Graph convolution stacks on the past and future subgraphs
//! - Kernel attention carrying past targets to future steps
//! - Preprocessing of categorical and numeric inputs into node features

pub mod adjacency;
pub mod config;
pub mod conv;
pub mod kernel;
pub mod model;
pub mod preprocessing;

pub use adjacency::{causal_mask, LearnedAdjacency};
pub use config::GnnConfig;
pub use conv::{layer_plan, GraphConv, GraphConvStack, LayerSpec, Propagation};
pub use kernel::{KernelAttention, KernelSettings, MaskedRowPolicy};
pub use model::{pairwise_distances, ForecastOutput, KernelGnn, MODEL_KIND};
pub use preprocessing::{CategoricalField, CategoricalSpec, Preprocessor};
