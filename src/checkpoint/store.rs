//! Checkpoint persistence.
//!
//! A checkpoint is a bincode-encoded `(meta, state)` pair, LZ4-compressed,
//! wrapped in an envelope carrying the SHA3-256 digest of the compressed
//! payload.

use crate::checkpoint::state::StateDict;
use crate::core::{now, Error, Hash256, Result, Timestamp};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Envelope format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Descriptive metadata stored with the parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Checkpoint ID
    pub id: Uuid,
    /// Creation time
    pub created_at: Timestamp,
    /// Model kind, e.g. "kernel-gnn"
    pub model: String,
    /// Model configuration as JSON
    pub config_json: String,
    /// Total scalar parameter count
    pub num_parameters: usize,
}

/// Model parameters plus the configuration needed to rebuild the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Metadata
    pub meta: CheckpointMeta,
    /// Parameters
    pub state: StateDict,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    digest: Hash256,
    payload: Vec<u8>,
}

impl Checkpoint {
    /// Create a checkpoint for a model kind and its JSON configuration.
    pub fn new(model: &str, config_json: String, state: StateDict) -> Self {
        Self {
            meta: CheckpointMeta {
                id: Uuid::new_v4(),
                created_at: now(),
                model: model.to_string(),
                config_json,
                num_parameters: state.num_parameters(),
            },
            state,
        }
    }

    /// Encode to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let payload = compress_prepend_size(&body);
        let envelope = Envelope {
            version: CHECKPOINT_VERSION,
            digest: Hash256::digest(&payload),
            payload,
        };
        debug!(
            raw = body.len(),
            compressed = envelope.payload.len(),
            "encoded checkpoint"
        );
        Ok(bincode::serialize(&envelope)?)
    }

    /// Decode from bytes, verifying the digest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = bincode::deserialize(bytes)
            .map_err(|e| Error::DeserializationError(e.to_string()))?;

        if envelope.version != CHECKPOINT_VERSION {
            return Err(Error::DeserializationError(format!(
                "unsupported checkpoint version {}",
                envelope.version
            )));
        }

        let actual = Hash256::digest(&envelope.payload);
        if actual != envelope.digest {
            return Err(Error::ChecksumMismatch {
                expected: envelope.digest.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let body = decompress_size_prepended(&envelope.payload)
            .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
        bincode::deserialize(&body).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    /// Write to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes)?;
        info!(
            path = %path.display(),
            model = %self.meta.model,
            parameters = self.meta.num_parameters,
            "saved checkpoint"
        );
        Ok(())
    }

    /// Read from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let checkpoint = Self::from_bytes(&bytes)?;
        info!(
            path = %path.display(),
            model = %checkpoint.meta.model,
            id = %checkpoint.meta.id,
            "loaded checkpoint"
        );
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn sample_state() -> StateDict {
        let mut state = StateDict::new();
        state.insert("M", &Array2::from_shape_fn((6, 2), |(i, j)| (i * 2 + j) as f32));
        state.insert_scalar("kernel.smoothing", -0.3);
        state
    }

    #[test]
    fn test_checkpoint_meta() {
        let ckpt = Checkpoint::new("kernel-gnn", "{}".to_string(), sample_state());
        assert_eq!(ckpt.meta.model, "kernel-gnn");
        assert_eq!(ckpt.meta.num_parameters, 13);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let ckpt = Checkpoint::new("kernel-gnn", "{\"a\":1}".to_string(), sample_state());
        let bytes = ckpt.to_bytes().unwrap();
        let restored = Checkpoint::from_bytes(&bytes).unwrap();
        assert_eq!(restored, ckpt);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let ckpt = Checkpoint::new("kernel-gnn", "{}".to_string(), sample_state());
        let mut bytes = ckpt.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(matches!(
            Checkpoint::from_bytes(&bytes),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Checkpoint::from_bytes(b"not a checkpoint").is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");

        let ckpt = Checkpoint::new("kernel-gnn", "{}".to_string(), sample_state());
        ckpt.save(&path).unwrap();
        let restored = Checkpoint::load(&path).unwrap();
        assert_eq!(restored.meta.id, ckpt.meta.id);
        assert_eq!(restored.state, ckpt.state);
    }
}
