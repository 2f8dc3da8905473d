//! Query-by-image search over a loaded index snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::embedder::{EmbedError, ImageEmbedder};
use crate::index::{IndexError, IndexState};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{path} does not look like an image file")]
    NotAnImage { path: PathBuf },

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// One ranked match.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub path: PathBuf,
    /// Cosine similarity in [0, 1].
    pub score: f32,
    /// 1-based rank within the returned set.
    pub rank: usize,
}

/// Read-only search session over one loaded [`IndexState`] snapshot.
/// Concurrent searches against the same engine are safe; the snapshot is
/// never mutated.
pub struct SearchEngine {
    embedder: Arc<dyn ImageEmbedder>,
    state: IndexState,
}

impl SearchEngine {
    pub fn new(embedder: Arc<dyn ImageEmbedder>, state: IndexState) -> Self {
        Self { embedder, state }
    }

    pub fn indexed_count(&self) -> usize {
        self.state.len()
    }

    /// Find up to `limit` indexed images similar to the one at `query`.
    ///
    /// Results are one per indexed file (positions are 1:1 with paths),
    /// exclude the query file itself when it happens to be indexed, and
    /// drop anything scoring below `min_similarity`. The returned length
    /// is the true match count, never padded.
    pub fn search(
        &self,
        query: &Path,
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchResult>, SearchError> {
        ensure_image_file(query)?;
        let embedding = self.embedder.embed_file(query)?;

        // One extra neighbor covers the query image itself being indexed.
        let hits = self.state.query(&embedding, limit + 1)?;

        let query_identity = std::fs::canonicalize(query).ok();
        let mut results = Vec::with_capacity(hits.len().min(limit));
        for hit in hits {
            if hit.score < min_similarity {
                break; // hits are sorted; everything after is lower
            }
            let entry = match self.state.entry(hit.position) {
                Some(entry) => entry,
                None => continue,
            };
            if is_same_file(&entry.path, query, query_identity.as_deref()) {
                continue;
            }
            if results.len() == limit {
                break;
            }
            results.push(SearchResult {
                path: entry.path.clone(),
                score: hit.score,
                rank: results.len() + 1,
            });
        }

        Ok(results)
    }
}

/// Self-exclusion identity: canonicalized paths when resolvable (covers
/// symlinks), raw path equality as fallback.
fn is_same_file(candidate: &Path, query: &Path, query_identity: Option<&Path>) -> bool {
    if candidate == query {
        return true;
    }
    match (query_identity, std::fs::canonicalize(candidate).ok()) {
        (Some(query_canonical), Some(candidate_canonical)) => {
            query_canonical == candidate_canonical
        }
        _ => false,
    }
}

/// Cheap content sniff so an obviously non-image query fails fast with an
/// actionable message instead of an opaque backend error.
fn ensure_image_file(path: &Path) -> Result<(), SearchError> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) if kind.matcher_type() == infer::MatcherType::Image => Ok(()),
        Ok(_) => Err(SearchError::NotAnImage {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(EmbedError::UnreadableImage {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
        .into()),
    }
}
