//! Integration tests for the indexing pipeline and search engine.
//!
//! These run against a deterministic mock embedder so they need no model
//! download: test images are tiny BMP-tagged files whose "class byte"
//! (the byte right after the BM magic) decides the embedding direction.
//! Files sharing a class byte are near-identical in vector space; files
//! with different class bytes are orthogonal.


use std::path::Path;

use crate::embedder::{EmbedError, ImageEmbedder};

pub const MOCK_DIMENSIONS: usize = 8;

pub struct MockEmbedder;

impl ImageEmbedder for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }

    fn embed_file(&self, path: &Path) -> Result<Vec<f32>, EmbedError> {
        let bytes = std::fs::read(path).map_err(|e| EmbedError::UnreadableImage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if bytes.len() < 3 {
            return Err(EmbedError::UnreadableImage {
                path: path.to_path_buf(),
                reason: "truncated image data".to_string(),
            });
        }

        let class = bytes[2] as usize;
        let mut vector = vec![0.0f32; MOCK_DIMENSIONS];
        vector[class % MOCK_DIMENSIONS] = 1.0;
        // Small length-dependent wobble: same class stays similar but not
        // always byte-identical.
        vector[(class + 1) % MOCK_DIMENSIONS] = (bytes.len() % 10) as f32 / 100.0;
        Ok(vector)
    }
}

/// Write a fake image: BMP magic (so content sniffing accepts it as an
/// image), a class byte, then filler to the requested length.
pub fn write_image(path: &Path, class: u8, len: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut bytes = vec![b'B', b'M', class];
    bytes.resize(len.max(3), 0x77);
    std::fs::write(path, bytes).unwrap();
}
