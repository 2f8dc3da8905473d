//! Vector index and the path-aligned index state.
//!
//! The search structure itself is behind the [`VectorIndex`] capability
//! trait so backends can be swapped without the rest of the pipeline
//! inspecting a concrete type. [`IndexState`] pairs the index with the
//! ordered entry list: position *i* in the index always corresponds to
//! entry *i*, and that pairing survives every add/remove and every
//! persistence round trip.

mod flat;
pub mod store;

pub use flat::FlatIndex;
pub use store::{IndexStore, StoreError, PATHS_FILE, VECTORS_FILE};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::FreshnessKey;
use crate::catalog::FileRecord;

/// Errors from vector insertion or query. Both are per-vector and
/// recoverable: the caller skips the offending entry.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot store or search with a zero-norm vector")]
    ZeroNormVector,
}

/// A single nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub position: usize,
    /// Cosine similarity in [0, 1].
    pub score: f32,
}

/// Capability interface over the nearest-neighbor backend.
pub trait VectorIndex: Send {
    fn dimensions(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full rebuild from an ordered vector set, discarding existing
    /// contents. The first rejected vector aborts the rebuild so the
    /// caller never ends up with a silently shortened index.
    fn build(&mut self, vectors: Vec<Vec<f32>>) -> Result<(), IndexError>;

    /// Append a vector, returning its position.
    fn add(&mut self, vector: Vec<f32>) -> Result<usize, IndexError>;

    /// Physically remove the vector at `position`; later positions shift
    /// down by one. The caller removes the paired entry at the same
    /// position so alignment is preserved.
    fn remove(&mut self, position: usize) -> Result<(), IndexError>;

    /// The stored (normalized) vector at `position`.
    fn vector(&self, position: usize) -> Option<&[f32]>;

    /// Top-`k` nearest neighbors, descending score; ties broken by lower
    /// position so earlier-indexed files win deterministically.
    fn query(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, IndexError>;
}

/// Per-position metadata persisted alongside the vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified_ms: i64,
}

impl From<&FileRecord> for IndexEntry {
    fn from(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            modified_ms: record.modified_ms,
        }
    }
}

/// The index plus its ordered entry list, kept positionally aligned.
///
/// Exclusively owned by a build while it mutates, then by a search
/// session as a read-only snapshot.
pub struct IndexState {
    entries: Vec<IndexEntry>,
    index: Box<dyn VectorIndex>,
}

impl IndexState {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: Box::new(FlatIndex::new(dimensions)),
        }
    }

    /// Rebuild from persisted parts. Entry and vector counts must already
    /// agree; a vector the backend rejects fails the whole load, since a
    /// skip would silently desync the pairing.
    pub fn from_parts(
        dimensions: usize,
        entries: Vec<IndexEntry>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        debug_assert_eq!(entries.len(), vectors.len());
        let mut index = FlatIndex::new(dimensions);
        index.build(vectors)?;
        Ok(Self {
            entries,
            index: Box::new(index),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.index.dimensions()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn entry(&self, position: usize) -> Option<&IndexEntry> {
        self.entries.get(position)
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.index.vector(position)
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|e| e.path == path)
    }

    /// Path → freshness mapping for incremental planning.
    pub fn known(&self) -> HashMap<PathBuf, FreshnessKey> {
        self.entries
            .iter()
            .map(|e| {
                (
                    e.path.clone(),
                    FreshnessKey {
                        size: e.size,
                        modified_ms: e.modified_ms,
                    },
                )
            })
            .collect()
    }

    /// Insert or replace the entry for `entry.path`.
    pub fn upsert(&mut self, entry: IndexEntry, vector: Vec<f32>) -> Result<(), IndexError> {
        if let Some(position) = self.position_of(&entry.path) {
            self.index.remove(position)?;
            self.entries.remove(position);
        }
        let position = self.index.add(vector)?;
        debug_assert_eq!(position, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Remove the entry for `path`, if present.
    pub fn remove_path(&mut self, path: &Path) -> bool {
        match self.position_of(path) {
            Some(position) => {
                // remove() on a valid position cannot fail in the flat
                // backend; treat a refusal as "not removed".
                if self.index.remove(position).is_err() {
                    return false;
                }
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, IndexError> {
        self.index.query(query, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> IndexEntry {
        IndexEntry {
            path: PathBuf::from(path),
            size: 1,
            modified_ms: 1,
        }
    }

    #[test]
    fn test_upsert_keeps_alignment() {
        let mut state = IndexState::new(3);
        state.upsert(entry("/a.jpg"), vec![1.0, 0.0, 0.0]).unwrap();
        state.upsert(entry("/b.jpg"), vec![0.0, 1.0, 0.0]).unwrap();
        assert_eq!(state.len(), 2);

        // Replacing /a.jpg must not duplicate it.
        state.upsert(entry("/a.jpg"), vec![0.0, 0.0, 1.0]).unwrap();
        assert_eq!(state.len(), 2);

        let position = state.position_of(Path::new("/a.jpg")).unwrap();
        assert_eq!(state.vector(position).unwrap(), &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_remove_path_shifts_pairing_together() {
        let mut state = IndexState::new(2);
        state.upsert(entry("/a.jpg"), vec![1.0, 0.0]).unwrap();
        state.upsert(entry("/b.jpg"), vec![0.0, 1.0]).unwrap();
        state.upsert(entry("/c.jpg"), vec![1.0, 1.0]).unwrap();

        assert!(state.remove_path(Path::new("/b.jpg")));
        assert!(!state.remove_path(Path::new("/b.jpg")));
        assert_eq!(state.len(), 2);

        // /c.jpg shifted into position 1 on both sides of the pairing.
        let position = state.position_of(Path::new("/c.jpg")).unwrap();
        assert_eq!(position, 1);
        let v = state.vector(position).unwrap();
        assert!((v[0] - v[1]).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_is_per_entry() {
        let mut state = IndexState::new(3);
        let err = state.upsert(entry("/a.jpg"), vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(state.len(), 0);

        state.upsert(entry("/b.jpg"), vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(state.len(), 1);
    }
}
