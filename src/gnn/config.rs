//! Kernel GNN configuration.

use crate::core::{Error, ForecastWindow, Result};
use crate::gnn::conv::Propagation;
use crate::gnn::kernel::KernelSettings;
use crate::gnn::preprocessing::{CategoricalSpec, NUMERIC_FIELDS};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of a [`KernelGnn`](crate::gnn::KernelGnn).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnnConfig {
    /// Past/future split of the time axis
    pub window: ForecastWindow,
    /// Categorical columns, in input order
    pub categorical: Vec<CategoricalSpec>,
    /// Hidden width of the kernel quadratic form
    pub kernel_hidden: usize,
    /// Hidden width of the preprocessing MLP
    pub preprocess_hidden: usize,
    /// Depth of the past-graph convolution stack
    pub num_layer1: usize,
    /// Depth of the future-graph convolution stack
    pub num_layer2: usize,
    /// Hidden width of the past stack when deeper than one layer
    pub hid_out_features1: Option<usize>,
    /// Hidden width of the future stack when deeper than one layer
    pub hid_out_features2: Option<usize>,
    /// Adjacency used by the convolutions
    pub propagation: Propagation,
    /// Kernel attention settings
    pub kernel: KernelSettings,
}

impl Default for GnnConfig {
    fn default() -> Self {
        Self {
            window: ForecastWindow::default(),
            categorical: Vec::new(),
            kernel_hidden: 16,
            preprocess_hidden: 128,
            num_layer1: 1,
            num_layer2: 1,
            hid_out_features1: None,
            hid_out_features2: None,
            propagation: Propagation::default(),
            kernel: KernelSettings::default(),
        }
    }
}

impl GnnConfig {
    /// Create a config for a window with defaults elsewhere.
    pub fn new(window: ForecastWindow) -> Self {
        Self {
            window,
            ..Default::default()
        }
    }

    /// Add a categorical column.
    pub fn with_categorical(mut self, spec: CategoricalSpec) -> Self {
        self.categorical.push(spec);
        self
    }

    /// Set the kernel hidden width.
    pub fn with_kernel_hidden(mut self, hidden: usize) -> Self {
        self.kernel_hidden = hidden;
        self
    }

    /// Set the preprocessing hidden width.
    pub fn with_preprocess_hidden(mut self, hidden: usize) -> Self {
        self.preprocess_hidden = hidden;
        self
    }

    /// Set the past stack depth and hidden width.
    pub fn with_past_layers(mut self, layers: usize, hidden: Option<usize>) -> Self {
        self.num_layer1 = layers;
        self.hid_out_features1 = hidden;
        self
    }

    /// Set the future stack depth and hidden width.
    pub fn with_future_layers(mut self, layers: usize, hidden: Option<usize>) -> Self {
        self.num_layer2 = layers;
        self.hid_out_features2 = hidden;
        self
    }

    /// Set the convolution propagation.
    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Set the kernel settings.
    pub fn with_kernel(mut self, kernel: KernelSettings) -> Self {
        self.kernel = kernel;
        self
    }

    /// Number of raw input columns expected by the model.
    pub fn raw_features(&self) -> usize {
        self.categorical.len() + NUMERIC_FIELDS
    }

    /// Width of the preprocessed node features.
    pub fn node_features(&self) -> usize {
        self.categorical.iter().map(|c| c.dim).sum::<usize>() + NUMERIC_FIELDS
    }

    /// Check the configuration for values no model can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.window.past == 0 || self.window.future == 0 {
            return Err(Error::InvalidConfig(
                "past and future must both be positive".to_string(),
            ));
        }
        if self.window.total() < 3 {
            return Err(Error::InvalidConfig(format!(
                "window of {} steps is too short (need at least 3)",
                self.window.total()
            )));
        }
        if self.kernel_hidden == 0 || self.preprocess_hidden == 0 {
            return Err(Error::InvalidConfig("hidden widths must be positive".to_string()));
        }
        if self.num_layer1 > 1 && !matches!(self.hid_out_features1, Some(h) if h > 0) {
            return Err(Error::InvalidConfig(
                "hid_out_features1 is required when num_layer1 > 1".to_string(),
            ));
        }
        if self.num_layer2 > 1 && !matches!(self.hid_out_features2, Some(h) if h > 0) {
            return Err(Error::InvalidConfig(
                "hid_out_features2 is required when num_layer2 > 1".to_string(),
            ));
        }
        if !(self.kernel.threshold >= 0.0 && self.kernel.threshold < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "kernel threshold {} outside [0, 1)",
                self.kernel.threshold
            )));
        }
        if !(self.kernel.temperature_scale > 0.0) {
            return Err(Error::InvalidConfig(
                "kernel temperature scale must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::SerializationError(e.to_string()))
    }
}
