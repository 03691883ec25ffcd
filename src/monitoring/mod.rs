//! Monitoring Module
//!
//! Log subscriber setup for binaries and tests embedding kgforecast. The
//! library itself only emits `tracing` events.

pub mod logging;

pub use logging::{init_logging, LogFormat, LogLevel, LoggerConfig};
