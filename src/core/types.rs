//! Common types used across kgforecast modules.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A 256-bit hash value (SHA3-256).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Hash a byte slice with SHA3-256.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Split of the time axis into an observed past and a forecast future.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastWindow {
    /// Number of observed steps
    pub past: usize,
    /// Number of steps to forecast
    pub future: usize,
}

impl ForecastWindow {
    /// Create a new window.
    pub fn new(past: usize, future: usize) -> Self {
        Self { past, future }
    }

    /// Total number of time steps (graph nodes).
    pub fn total(&self) -> usize {
        self.past + self.future
    }
}

impl Default for ForecastWindow {
    fn default() -> Self {
        Self {
            past: 200,
            future: 65,
        }
    }
}
