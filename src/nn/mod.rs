//! Neural network primitives.
//!
//! Dense layers over `ndarray` tensors used by the forecasting models:
//! - Linear projections and embedding tables
//! - Layer normalization
//! - Activations and (masked) softmax
//! - The `Module` trait for named parameter export/import

pub mod activation;
pub mod gaussian;
pub mod linear;
pub mod module;
pub mod norm;

pub use activation::{elu, masked_softmax, relu, sigmoid, softmax_last_axis, Activation};
pub use gaussian::{log_density_gaussian, soft_clamp5, Normal};
pub use linear::{Embedding, Linear};
pub use module::{param_name, Module};
pub use norm::LayerNorm;
