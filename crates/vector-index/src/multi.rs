//! C5: holds up to five labeled vectors per candidate (base, title,
//! keywords, people, brands). `items[id].entries[]` and the reverse
//! `pos -> (id, label)` map must stay a permutation of each other (§8).

use crate::{atomic_write, IndexError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorLabel {
    Base,
    Title,
    Keywords,
    People,
    Brands,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub pos: usize,
    pub hash: String,
    pub label: VectorLabel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MultiIndexData {
    dim: usize,
    vectors: Vec<Vec<f32>>,
    reverse: Vec<(Uuid, VectorLabel)>,
    items: HashMap<Uuid, Vec<Entry>>,
}

pub struct MultiVectorIndex {
    dim: usize,
    data: RwLock<MultiIndexData>,
}

impl MultiVectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: RwLock::new(MultiIndexData {
                dim,
                ..Default::default()
            }),
        }
    }

    /// Adds or replaces labeled vectors for a batch of candidates. `base`
    /// must be present for a candidate to participate, per §3.
    #[instrument(skip(self, ids, vectors, labels, hashes))]
    pub async fn add_items(
        &self,
        ids: &[Uuid],
        vectors: &[Vec<f32>],
        labels: &[VectorLabel],
        hashes: &[String],
    ) -> Result<()> {
        if ids.len() != vectors.len() || ids.len() != labels.len() || ids.len() != hashes.len() {
            return Err(IndexError::CountMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            });
        }
        let mut data = self.data.write().await;
        for (((id, vector), label), hash) in ids.iter().zip(vectors).zip(labels).zip(hashes) {
            if vector.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    got: vector.len(),
                });
            }
            // Replace an existing entry for the same (id, label) in place
            // rather than leaking a stale position.
            if let Some(entries) = data.items.get(id) {
                if let Some(existing) = entries.iter().find(|e| e.label == *label) {
                    let pos = existing.pos;
                    data.vectors[pos] = vector.clone();
                    data.reverse[pos] = (*id, *label);
                    let entries = data.items.get_mut(id).unwrap();
                    if let Some(e) = entries.iter_mut().find(|e| e.label == *label) {
                        e.hash = hash.clone();
                    }
                    continue;
                }
            }
            let pos = data.vectors.len();
            data.vectors.push(vector.clone());
            data.reverse.push((*id, *label));
            data.items.entry(*id).or_default().push(Entry {
                pos,
                hash: hash.clone(),
                label: *label,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, query))]
    pub async fn search(&self, label: VectorLabel, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        let data = self.data.read().await;
        let mut scored: Vec<(Uuid, f32)> = data
            .reverse
            .iter()
            .zip(data.vectors.iter())
            .filter(|((_, l), _)| *l == label)
            .map(|((id, _), v)| (*id, taste_core::math::cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    pub async fn get_missing_or_stale(&self, current_hashes: &HashMap<Uuid, String>) -> Vec<Uuid> {
        let data = self.data.read().await;
        current_hashes
            .iter()
            .filter(|(id, hash)| match data.items.get(*id) {
                None => true,
                Some(entries) => entries
                    .iter()
                    .find(|e| e.label == VectorLabel::Base)
                    .map(|e| &e.hash != *hash)
                    .unwrap_or(true),
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn positions_to_items(&self, positions: &[usize]) -> Vec<(Uuid, VectorLabel)> {
        let data = self.data.read().await;
        positions
            .iter()
            .filter_map(|p| data.reverse.get(*p).copied())
            .collect()
    }

    /// Verifies the §8 invariant that the reverse map is a permutation of
    /// the forward `items` map.
    pub async fn is_consistent(&self) -> bool {
        let data = self.data.read().await;
        for (pos, (id, label)) in data.reverse.iter().enumerate() {
            match data.items.get(id) {
                Some(entries) => {
                    if !entries.iter().any(|e| e.pos == pos && e.label == *label) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        for (id, entries) in data.items.iter() {
            for e in entries {
                match data.reverse.get(e.pos) {
                    Some((rid, rlabel)) if rid == id && *rlabel == e.label => {}
                    _ => return false,
                }
            }
        }
        true
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
        let data: MultiIndexData = bincode::deserialize(&bytes)?;
        Ok(Self {
            dim,
            data: RwLock::new(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_items_then_search_finds_by_label() {
        let index = MultiVectorIndex::new(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index
            .add_items(
                &[a, a, b],
                &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.9, 0.1, 0.0]],
                &[VectorLabel::Base, VectorLabel::Title, VectorLabel::Base],
                &["h1".into(), "h2".into(), "h3".into()],
            )
            .await
            .unwrap();

        let base_hits = index.search(VectorLabel::Base, &[1.0, 0.0, 0.0], 5).await;
        assert_eq!(base_hits.len(), 2);
        assert!(base_hits.iter().all(|(id, _)| *id == a || *id == b));

        let title_hits = index.search(VectorLabel::Title, &[0.0, 1.0, 0.0], 5).await;
        assert_eq!(title_hits.len(), 1);
        assert_eq!(title_hits[0].0, a);
    }

    #[tokio::test]
    async fn reverse_map_stays_a_permutation_of_items() {
        let index = MultiVectorIndex::new(3);
        let a = Uuid::new_v4();
        index
            .add_items(
                &[a, a],
                &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
                &[VectorLabel::Base, VectorLabel::Keywords],
                &["h1".into(), "h2".into()],
            )
            .await
            .unwrap();
        assert!(index.is_consistent().await);
    }

    #[tokio::test]
    async fn replacing_an_existing_label_does_not_break_consistency() {
        let index = MultiVectorIndex::new(3);
        let a = Uuid::new_v4();
        index
            .add_items(&[a], &[vec![1.0, 0.0, 0.0]], &[VectorLabel::Base], &["h1".into()])
            .await
            .unwrap();
        index
            .add_items(&[a], &[vec![0.0, 1.0, 0.0]], &[VectorLabel::Base], &["h2".into()])
            .await
            .unwrap();
        assert!(index.is_consistent().await);
        let hits = index.search(VectorLabel::Base, &[0.0, 1.0, 0.0], 1).await;
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_or_stale_detects_absent_and_changed_hashes() {
        let index = MultiVectorIndex::new(3);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index
            .add_items(&[a], &[vec![1.0, 0.0, 0.0]], &[VectorLabel::Base], &["current".into()])
            .await
            .unwrap();

        let mut current = HashMap::new();
        current.insert(a, "stale".to_string());
        current.insert(b, "new".to_string());

        let missing = index.get_missing_or_stale(&current).await;
        assert!(missing.contains(&a));
        assert!(missing.contains(&b));
    }
}
