//! Named parameter export and import.

use crate::checkpoint::StateDict;
use crate::core::Result;

/// A component that owns trainable parameters.
///
/// Parameters are addressed by dotted names (`kernel.W`, `gnn1.0.lin.weight`),
/// so a whole model flattens into a single [`StateDict`].
pub trait Module {
    /// Write every parameter into `state` under `prefix`.
    fn collect_parameters(&self, prefix: &str, state: &mut StateDict);

    /// Overwrite every parameter from `state`. Missing or mis-shaped
    /// entries are errors and leave the module partially updated.
    fn load_parameters(&mut self, prefix: &str, state: &StateDict) -> Result<()>;

    /// Export all parameters without a prefix.
    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        self.collect_parameters("", &mut state);
        state
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.state_dict().num_parameters()
    }
}

/// Join a parameter prefix and a local name.
pub fn param_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}
