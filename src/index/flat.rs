//! Exact cosine-similarity backend.
//!
//! Vectors are L2-normalized on insertion, so similarity is the plain dot
//! product, clamped to [0, 1]. Exhaustive scan per query; fine for the
//! collection sizes a single machine produces, and trivially deterministic.

use super::{Hit, IndexError, VectorIndex};

pub struct FlatIndex {
    dimensions: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: Vec::new(),
        }
    }

    fn normalize(&self, mut vector: Vec<f32>) -> Result<Vec<f32>, IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }
        for x in &mut vector {
            *x /= norm;
        }
        Ok(vector)
    }
}

impl VectorIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn build(&mut self, vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        let mut normalized = Vec::with_capacity(vectors.len());
        for vector in vectors {
            normalized.push(self.normalize(vector)?);
        }
        self.vectors = normalized;
        Ok(())
    }

    fn add(&mut self, vector: Vec<f32>) -> Result<usize, IndexError> {
        let vector = self.normalize(vector)?;
        self.vectors.push(vector);
        Ok(self.vectors.len() - 1)
    }

    fn remove(&mut self, position: usize) -> Result<(), IndexError> {
        if position < self.vectors.len() {
            self.vectors.remove(position);
        }
        Ok(())
    }

    fn vector(&self, position: usize) -> Option<&[f32]> {
        self.vectors.get(position).map(|v| v.as_slice())
    }

    fn query(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, IndexError> {
        let query = self.normalize(query.to_vec())?;

        let mut hits: Vec<Hit> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, stored)| {
                let dot: f32 = query.iter().zip(stored.iter()).map(|(a, b)| a * b).sum();
                Hit {
                    position,
                    score: dot.max(0.0),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);

        Ok(hits)
    }
}
