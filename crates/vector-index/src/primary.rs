//! C4: a single ANN index over all active candidate base embeddings.

use crate::{atomic_write, IndexError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PrimaryIndexData {
    dim: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<Uuid>,
}

pub struct PrimaryVectorIndex {
    dim: usize,
    data: RwLock<PrimaryIndexData>,
}

impl PrimaryVectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: RwLock::new(PrimaryIndexData {
                dim,
                vectors: Vec::new(),
                ids: Vec::new(),
            }),
        }
    }

    fn check_shapes(&self, vectors: &[Vec<f32>], ids: &[Uuid]) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(IndexError::CountMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: bad.len(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, vectors, ids))]
    pub async fn build(&self, vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Result<()> {
        self.check_shapes(&vectors, &ids)?;
        let mut data = self.data.write().await;
        data.dim = self.dim;
        data.vectors = vectors;
        data.ids = ids;
        Ok(())
    }

    #[instrument(skip(self, vectors, ids))]
    pub async fn append(&self, vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Result<()> {
        self.check_shapes(&vectors, &ids)?;
        let mut data = self.data.write().await;
        data.vectors.extend(vectors);
        data.ids.extend(ids);
        Ok(())
    }

    #[instrument(skip(self, query))]
    pub async fn search(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        let data = self.data.read().await;
        let mut scored: Vec<(Uuid, f32)> = data
            .vectors
            .iter()
            .zip(data.ids.iter())
            .map(|(v, id)| (*id, taste_core::math::cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[instrument(skip(self))]
    pub async fn persist(&self, path: &PathBuf) -> Result<()> {
        let data = self.data.read().await;
        let bytes = bincode::serialize(&*data)?;
        atomic_write(path, &bytes)
    }

    #[instrument]
    pub async fn load(path: &PathBuf, dim: usize) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let data: PrimaryIndexData = bincode::deserialize(&bytes)?;
        Ok(Self {
            dim,
            data: RwLock::new(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3(x: f32, y: f32, z: f32) -> Vec<f32> {
        vec![x, y, z]
    }

    #[tokio::test]
    async fn search_returns_closest_by_cosine_descending() {
        let index = PrimaryVectorIndex::new(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        index
            .build(
                vec![vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0), vec3(0.9, 0.1, 0.0)],
                vec![a, b, c],
            )
            .await
            .unwrap();
        let results = index.search(&vec3(1.0, 0.0, 0.0), 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, a);
        assert_eq!(results[1].0, c);
    }

    #[tokio::test]
    async fn append_grows_index_without_losing_existing_entries() {
        let index = PrimaryVectorIndex::new(3);
        let a = Uuid::new_v4();
        index.build(vec![vec3(1.0, 0.0, 0.0)], vec![a]).await.unwrap();
        let b = Uuid::new_v4();
        index.append(vec![vec3(0.0, 1.0, 0.0)], vec![b]).await.unwrap();
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn mismatched_counts_are_rejected() {
        let index = PrimaryVectorIndex::new(3);
        let result = index.build(vec![vec3(1.0, 0.0, 0.0)], vec![]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn persist_and_reload_round_trips_search_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("primary.bin");
        let index = PrimaryVectorIndex::new(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index
            .build(vec![vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0)], vec![a, b])
            .await
            .unwrap();
        index.persist(&path).await.unwrap();

        let reloaded = PrimaryVectorIndex::load(&path, 3).await.unwrap();
        let before = index.search(&vec3(1.0, 0.0, 0.0), 2).await;
        let after = reloaded.search(&vec3(1.0, 0.0, 0.0), 2).await;
        assert_eq!(before, after);
    }
}
