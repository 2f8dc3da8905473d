//! Embedding provider interface.
//!
//! The pipeline only ever talks to [`ImageEmbedder`]; the concrete backend
//! (fastembed/ONNX CLIP, see [`clip`]) is one adapter behind it, and tests
//! plug in a deterministic mock.

pub mod clip;

pub use clip::ClipEmbedder;

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("model initialization failed: {0}")]
    InitFailed(String),

    #[error("unknown model: {0}")]
    InvalidModel(String),

    /// Per-file, recoverable: the build skips the file and moves on.
    #[error("cannot read image {path}: {reason}")]
    UnreadableImage { path: PathBuf, reason: String },

    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

/// Maps an image file to a fixed-length float vector.
pub trait ImageEmbedder: Send + Sync {
    /// Model name as configured (e.g. "clip-vit-b-32").
    fn name(&self) -> &str;

    /// Output vector length; constant for the lifetime of the embedder.
    fn dimensions(&self) -> usize;

    fn embed_file(&self, path: &Path) -> Result<Vec<f32>, EmbedError>;

    /// SHA-256 of the model name, stamped into persisted artifacts so an
    /// index built with a different model is rejected at load.
    fn model_id_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.name().as_bytes());
        hasher.finalize().into()
    }
}
