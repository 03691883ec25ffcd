//! Checkpoint Module
//!
//! Persists trained parameters:
//! - `StateDict`: parameter name to tensor mapping
//! - `Checkpoint`: parameters plus model configuration, stored compressed
//!   with an integrity digest

pub mod state;
pub mod store;

pub use state::{StateDict, TensorRecord};
pub use store::{Checkpoint, CheckpointMeta, CHECKPOINT_VERSION};
