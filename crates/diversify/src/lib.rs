//! C11 Diversifier: maximal marginal relevance over a scored candidate
//! list, grounded directly on the MMR selection loop used for post-rank
//! diversity filtering elsewhere in the corpus, generalized to accept
//! either TF-IDF or embedding vectors via a caller-supplied lookup.

use taste_core::math::cosine_similarity;
use tracing::instrument;
use uuid::Uuid;

const LAMBDA: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub candidate_id: Uuid,
    pub score: f32,
}

/// Selects up to `limit` items from `candidates`, balancing relevance
/// (`score`) against redundancy with already-selected items. `vector_of`
/// resolves a candidate to whatever vector space the caller wants MMR
/// computed over (TF-IDF or dense embedding); a candidate with no vector
/// contributes zero similarity to any other item.
#[instrument(skip(candidates, vector_of))]
pub fn diversify(mut candidates: Vec<ScoredItem>, limit: usize, vector_of: impl Fn(Uuid) -> Option<Vec<f32>>) -> Vec<ScoredItem> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<ScoredItem> = Vec::new();
    let mut selected_vectors: Vec<Vec<f32>> = Vec::new();
    let mut remaining = candidates;

    while selected.len() < limit && !remaining.is_empty() {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_index = 0;

        for (index, candidate) in remaining.iter().enumerate() {
            let relevance = candidate.score;
            let max_similarity = if selected_vectors.is_empty() {
                0.0
            } else {
                match vector_of(candidate.candidate_id) {
                    Some(v) => selected_vectors.iter().map(|s| cosine_similarity(&v, s)).fold(0.0f32, f32::max),
                    None => 0.0,
                }
            };

            let mmr_score = LAMBDA * relevance - (1.0 - LAMBDA) * max_similarity;
            if mmr_score > best_score || (mmr_score == best_score && candidate.candidate_id < remaining[best_index].candidate_id) {
                best_score = mmr_score;
                best_index = index;
            }
        }

        let chosen = remaining.remove(best_index);
        if let Some(v) = vector_of(chosen.candidate_id) {
            selected_vectors.push(v);
        }
        selected.push(chosen);
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn item(id: Uuid, score: f32) -> ScoredItem {
        ScoredItem { candidate_id: id, score }
    }

    #[test]
    fn prefers_dissimilar_items_over_equally_scored_similar_ones() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let mut vectors = HashMap::new();
        vectors.insert(a, vec![1.0, 0.0]);
        vectors.insert(b, vec![1.0, 0.0]); // identical to a
        vectors.insert(c, vec![0.0, 1.0]); // orthogonal to a

        let candidates = vec![item(a, 0.9), item(b, 0.89), item(c, 0.85)];
        let result = diversify(candidates, 2, |id| vectors.get(&id).cloned());

        let ids: Vec<Uuid> = result.iter().map(|s| s.candidate_id).collect();
        assert_eq!(ids[0], a);
        assert_eq!(ids[1], c);
    }

    #[test]
    fn caps_output_at_limit() {
        let items: Vec<ScoredItem> = (0..10).map(|_| item(Uuid::new_v4(), 0.5)).collect();
        let result = diversify(items, 3, |_| None);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let result = diversify(Vec::new(), 5, |_| None);
        assert!(result.is_empty());
    }
}
