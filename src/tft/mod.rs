//! Temporal Fusion Transformer building blocks
//!
//! Inference-mode components for variable embedding and selection:
//! - Categorical and target embeddings with positional augmentation
//! - Gated linear units and gated residual networks
//! - Variable selection over embedded covariates
//! - LSTM encoder and decoder handing over recurrent state
//! - Post-decoder gated add-and-norm

pub mod embedding;
pub mod gating;
pub mod lstm;
pub mod post;
pub mod selection;

pub use embedding::{CategoricalEmbedding, TargetEmbedding, POSITIONAL_FIELDS};
pub use gating::{FlattenGrn, Glu, Grn};
pub use lstm::{DecoderLstm, EncoderLstm, Lstm, LstmCell, LstmState};
pub use post::PostTransformer;
pub use selection::VariableSelection;
