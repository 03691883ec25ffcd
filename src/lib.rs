//! # kgforecast - Kernel Graph Forecasting
//!
//! Multi-step time-series forecasting with graph neural networks over time
//! steps:
//! - **GNN**: learned causal adjacency, graph convolutions and kernel
//!   attention from past to future steps
//! - **TFT**: embedding, gating, variable selection and LSTM encoder/decoder
//!   blocks
//! - **Checkpoint**: named parameters in a compressed, digest-checked file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kgforecast::core::ForecastWindow;
//! use kgforecast::gnn::{CategoricalSpec, GnnConfig, KernelGnn};
//! use ndarray::Array3;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let config = GnnConfig::new(ForecastWindow::new(24, 6))
//!     .with_categorical(CategoricalSpec::new("hour", 24, 4));
//! let mut rng = StdRng::seed_from_u64(0);
//! let model = KernelGnn::new(config, &mut rng).unwrap();
//!
//! // hour, two covariates, target
//! let raw = Array3::<f32>::zeros((8, 30, 4));
//! let output = model.forward(&raw).unwrap();
//! println!("predictions: {:?}", output.predictions.dim());
//! ```

pub mod checkpoint;
pub mod core;
pub mod gnn;
pub mod monitoring;
pub mod nn;
pub mod tft;

pub use core::error::{Error, Result};
