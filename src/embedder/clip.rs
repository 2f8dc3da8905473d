//! fastembed-backed image embedding.
//!
//! Wraps fastembed's ONNX image models. The model downloads on first use
//! into the `models/` subdirectory of the data directory. Uses a Mutex
//! because fastembed's embed() requires exclusive access to the session.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};

use super::{EmbedError, ImageEmbedder};

pub struct ClipEmbedder {
    model: Mutex<ImageEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl ClipEmbedder {
    /// Load (downloading if needed) the named model, caching model files
    /// under `cache_dir/models`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbedError> {
        let model_enum = parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbedError::InitFailed(format!("failed to create models directory: {e}"))
        })?;

        let options = ImageInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = ImageEmbedding::try_new(options)
            .map_err(|e| EmbedError::InitFailed(e.to_string()))?;

        let dimensions = probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }
}

impl ImageEmbedder for ClipEmbedder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_file(&self, path: &Path) -> Result<Vec<f32>, EmbedError> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| EmbedError::EmbeddingFailed(format!("failed to acquire model lock: {e}")))?;

        let embeddings = model
            .embed(vec![path], None)
            .map_err(|e| EmbedError::UnreadableImage {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::EmbeddingFailed("no embedding returned".to_string()))
    }
}

fn parse_model_name(name: &str) -> Result<ImageEmbeddingModel, EmbedError> {
    match name.to_lowercase().as_str() {
        "clip-vit-b-32" | "clipvitb32" => Ok(ImageEmbeddingModel::ClipVitB32),
        "resnet50" | "resnet-50" => Ok(ImageEmbeddingModel::Resnet50),
        "unicom-vit-b-16" | "unicomvitb16" => Ok(ImageEmbeddingModel::UnicomVitB16),
        "unicom-vit-b-32" | "unicomvitb32" => Ok(ImageEmbeddingModel::UnicomVitB32),
        "nomic-embed-vision-v1.5" | "nomicembedvisionv15" => {
            Ok(ImageEmbeddingModel::NomicEmbedVisionV15)
        }
        _ => Err(EmbedError::InvalidModel(format!(
            "unknown model: {name}. Supported models: clip-vit-b-32, resnet50, \
             unicom-vit-b-16, unicom-vit-b-32, nomic-embed-vision-v1.5"
        ))),
    }
}

/// Determine the output dimensionality by embedding a synthesized 1×1 PNG.
fn probe_dimensions(model: &mut ImageEmbedding) -> Result<usize, EmbedError> {
    let probe = tempfile::Builder::new()
        .prefix("lookalike-probe-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| EmbedError::InitFailed(format!("failed to create probe image: {e}")))?;

    image::RgbImage::new(1, 1)
        .save(probe.path())
        .map_err(|e| EmbedError::InitFailed(format!("failed to write probe image: {e}")))?;

    let embeddings = model
        .embed(vec![probe.path().to_path_buf()], None)
        .map_err(|e| EmbedError::InitFailed(format!("failed to probe dimensions: {e}")))?;

    embeddings
        .first()
        .map(|v| v.len())
        .ok_or_else(|| EmbedError::InitFailed("model returned no embedding".to_string()))
}
