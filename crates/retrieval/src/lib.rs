//! C7 Hybrid Retriever: merges dense (C4/C5) and lexical (C6) hits,
//! enriches with catalog metadata and fit scoring (C12), grounded on the
//! cache-then-execute-then-enrich orchestration shape of the corpus's
//! hybrid search service, rebuilt around this core's own merge formula.

use std::collections::HashMap;
use taste_cache::{ttl, TasteCache};
use taste_catalog::Candidate;
use taste_core::math::remap_cosine_unit;
use taste_embedding::EmbeddingService;
use taste_lexical::{LexicalIndex, LexicalQueryOptions};
use taste_profile::{fit_score, UserProfile};
use taste_vector_index::PrimaryVectorIndex;
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

const DENSE_K: usize = 30;
const LEXICAL_K: usize = 12;
const DENSE_WEIGHT: f32 = 0.6;
const LEXICAL_WEIGHT: f32 = 0.4;
const ABSENT_SOURCE_NEUTRAL: f32 = 0.3;
const SEARCH_WEIGHT: f32 = 0.7;
const FIT_WEIGHT: f32 = 0.3;
const NEGATIVE_CUE_SUBTRACTION: f32 = 0.25;

const SUGGEST_NEIGHBOR_K: usize = 25;
const SUGGEST_MIN_SIMILARITY: f32 = 0.45;
const SUGGEST_DEFAULT_K: usize = 20;
const SUGGEST_DIVERSITY_MAX_BOOST: f32 = 0.15;
const SUGGEST_SUGGESTION_WEIGHT: f32 = 0.5;
const SUGGEST_FIT_WEIGHT: f32 = 0.3;
const SUGGEST_DIVERSITY_WEIGHT: f32 = 0.25;
const SUGGEST_TOP_GENRE_BONUS: f32 = 0.05;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding error: {0}")]
    Embedding(#[from] taste_embedding::EmbeddingError),
    #[error("lexical index error: {0}")]
    Lexical(#[from] taste_lexical::LexicalError),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EnrichedHit {
    pub candidate_id: Uuid,
    pub search_score: f32,
    pub fit_score: Option<f32>,
    pub final_score: f32,
}

pub struct RetrievalContext<'a> {
    pub primary_index: &'a PrimaryVectorIndex,
    pub lexical_index: &'a LexicalIndex,
    pub embedder: &'a EmbeddingService,
    pub catalog: &'a HashMap<Uuid, Candidate>,
    /// Per-candidate base embedding, used for suggestion-neighbor lookups
    /// and semantic similarity; kept separate from the ANN index because
    /// suggestions need direct by-id vector access rather than a search.
    pub candidate_embeddings: &'a HashMap<Uuid, Vec<f32>>,
    pub cache: Option<&'a TasteCache>,
}

#[derive(Debug, Clone, Default)]
pub struct RetrieveRequest<'a> {
    pub query: &'a str,
    pub seeds: &'a [String],
    pub moods: &'a [String],
    pub negative_cues: &'a [String],
    pub media_type_filter: Option<&'a str>,
    pub k: usize,
    pub strict_title_only: bool,
}

impl<'a> RetrieveRequest<'a> {
    fn cache_key(&self) -> String {
        let normalized = self.query.trim().to_lowercase();
        TasteCache::generate_key(
            "hybrid_search",
            &[&normalized, self.media_type_filter.unwrap_or(""), &self.k.to_string()],
        )
    }
}

/// Encodes the combined query vector per §4.7 step 1: averages the query,
/// seed ("like: X"), and mood ("mood: Y") embeddings, then subtracts a
/// damped projection onto each negative cue before renormalizing.
#[instrument(skip(embedder, request))]
async fn build_query_vector(embedder: &EmbeddingService, request: &RetrieveRequest<'_>) -> Result<Vec<f32>> {
    let mut vectors = vec![embedder.encode(request.query).await?];
    for seed in request.seeds {
        vectors.push(embedder.encode(&format!("like: {seed}")).await?);
    }
    for mood in request.moods {
        vectors.push(embedder.encode(&format!("mood: {mood}")).await?);
    }

    let dim = vectors[0].len();
    let mut averaged = vec![0.0f32; dim];
    for v in &vectors {
        for (i, x) in v.iter().enumerate() {
            averaged[i] += x;
        }
    }
    let n = vectors.len() as f32;
    for x in averaged.iter_mut() {
        *x /= n;
    }
    taste_core::math::normalize_in_place(&mut averaged);

    for cue in request.negative_cues {
        let cue_vec = embedder.encode(cue).await?;
        let dot: f32 = averaged.iter().zip(cue_vec.iter()).map(|(a, b)| a * b).sum();
        for (x, c) in averaged.iter_mut().zip(cue_vec.iter()) {
            *x -= NEGATIVE_CUE_SUBTRACTION * dot * c;
        }
        taste_core::math::normalize_in_place(&mut averaged);
    }

    Ok(averaged)
}

/// §4.7 search algorithm: dense + lexical merge, catalog enrichment, and
/// optional fit-score blending. `profile` enables fit blending; passing
/// `None` skips step 6 and returns raw search scores.
#[instrument(skip(ctx, request, profile))]
pub async fn retrieve(ctx: &RetrievalContext<'_>, request: &RetrieveRequest<'_>, profile: Option<&UserProfile>) -> Result<Vec<EnrichedHit>> {
    let cache_key = request.cache_key();
    if let Some(cache) = ctx.cache {
        match cache.get::<Vec<EnrichedHit>>(&cache_key).await {
            Ok(Some(hits)) => return Ok(hits),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "retrieval cache read failed, continuing uncached"),
        }
    }

    let query_vector = build_query_vector(ctx.embedder, request).await?;
    let dense_hits = ctx.primary_index.search(&query_vector, DENSE_K).await;
    let lexical_hits = ctx
        .lexical_index
        .search(request.query, LEXICAL_K, LexicalQueryOptions { strict_title_only: request.strict_title_only })
        .await?;

    let mut dense_scores: HashMap<Uuid, f32> = HashMap::new();
    for (id, sim) in dense_hits {
        dense_scores.insert(id, remap_cosine_unit(sim));
    }
    let mut lexical_scores: HashMap<Uuid, f32> = HashMap::new();
    for hit in lexical_hits {
        lexical_scores.insert(hit.id, hit.score);
    }

    let mut merged: HashMap<Uuid, f32> = HashMap::new();
    for id in dense_scores.keys().chain(lexical_scores.keys()).copied().collect::<std::collections::HashSet<_>>() {
        let d = dense_scores.get(&id).copied();
        let l = lexical_scores.get(&id).copied();
        let score = match (d, l) {
            (Some(d), Some(l)) => DENSE_WEIGHT * d + LEXICAL_WEIGHT * l,
            (Some(d), None) => DENSE_WEIGHT * d + LEXICAL_WEIGHT * ABSENT_SOURCE_NEUTRAL,
            (None, Some(l)) => DENSE_WEIGHT * ABSENT_SOURCE_NEUTRAL + LEXICAL_WEIGHT * l,
            (None, None) => continue,
        };
        merged.insert(id, score);
    }

    let mut hits: Vec<EnrichedHit> = Vec::new();
    for (id, search_score) in merged {
        let Some(candidate) = ctx.catalog.get(&id) else { continue };
        if !candidate.active {
            continue;
        }
        if let Some(filter) = request.media_type_filter {
            if candidate.media_type.as_str() != filter {
                continue;
            }
        }

        let fit = profile.map(|p| {
            let embedding = ctx.candidate_embeddings.get(&id).map(|v| v.as_slice());
            fit_score(p, candidate, embedding).fit
        });

        let final_score = match fit {
            Some(f) => SEARCH_WEIGHT * search_score + FIT_WEIGHT * f,
            None => search_score,
        };

        hits.push(EnrichedHit {
            candidate_id: id,
            search_score,
            fit_score: fit,
            final_score,
        });
    }

    hits.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal).then(a.candidate_id.cmp(&b.candidate_id)));
    hits.truncate(request.k);

    if let Some(cache) = ctx.cache {
        if let Err(e) = cache.set(&cache_key, &hits, ttl::SEARCH_RESULT_SECONDS).await {
            warn!(error = %e, "retrieval cache write failed");
        }
    }

    Ok(hits)
}

/// §4.7 suggestions algorithm, list-based with no textual query.
#[instrument(skip(ctx, list_item_ids, profile))]
pub async fn suggestions(ctx: &RetrievalContext<'_>, list_item_ids: &[Uuid], profile: Option<&UserProfile>, top_genres: &[String], k: Option<usize>) -> Vec<EnrichedHit> {
    let k = k.unwrap_or(SUGGEST_DEFAULT_K);

    if list_item_ids.is_empty() {
        return popular_fallback(ctx, &[], k);
    }

    let list_set: std::collections::HashSet<Uuid> = list_item_ids.iter().copied().collect();
    let mut frequency: HashMap<Uuid, u32> = HashMap::new();
    let mut similarity_sum: HashMap<Uuid, f32> = HashMap::new();

    for item_id in list_item_ids {
        let Some(vector) = ctx.candidate_embeddings.get(item_id) else { continue };
        let neighbors = ctx.primary_index.search(vector, SUGGEST_NEIGHBOR_K).await;
        for (id, sim) in neighbors {
            let sim = remap_cosine_unit(sim);
            if sim < SUGGEST_MIN_SIMILARITY || list_set.contains(&id) {
                continue;
            }
            *frequency.entry(id).or_insert(0) += 1;
            *similarity_sum.entry(id).or_insert(0.0) += sim;
        }
    }

    if frequency.is_empty() {
        return genre_balanced_round_robin(ctx, &list_set, k);
    }

    let max_avg_similarity = frequency
        .keys()
        .map(|id| similarity_sum[id] / frequency[id] as f32)
        .fold(0.0f32, f32::max)
        .max(f32::EPSILON);
    let max_frequency = frequency.values().copied().max().unwrap_or(1).max(1) as f32;

    let genre_counts = genre_counts_for(ctx, list_item_ids);
    let median_genre_count = median(&genre_counts.values().copied().collect::<Vec<_>>());

    let mut hits = Vec::new();
    for (id, freq) in &frequency {
        let Some(candidate) = ctx.catalog.get(id) else { continue };
        if !candidate.active {
            continue;
        }
        let avg_similarity = similarity_sum[id] / *freq as f32;
        let suggestion_score = 0.6 * (avg_similarity / max_avg_similarity) + 0.4 * (*freq as f32 / max_frequency);

        let under_represented = candidate.genres.iter().any(|g| genre_counts.get(g).copied().unwrap_or(0) as f32 <= median_genre_count);
        let diversity_boost = if under_represented { SUGGEST_DIVERSITY_MAX_BOOST } else { 0.0 };

        let fit = profile.map(|p| {
            let embedding = ctx.candidate_embeddings.get(id).map(|v| v.as_slice());
            fit_score(p, candidate, embedding).fit
        });

        let top_genre_bonus = if candidate.genres.iter().any(|g| top_genres.iter().any(|t| t.eq_ignore_ascii_case(g))) {
            SUGGEST_TOP_GENRE_BONUS
        } else {
            0.0
        };

        let final_score = SUGGEST_SUGGESTION_WEIGHT * suggestion_score + SUGGEST_FIT_WEIGHT * fit.unwrap_or(0.5) + SUGGEST_DIVERSITY_WEIGHT * diversity_boost + top_genre_bonus;

        hits.push(EnrichedHit {
            candidate_id: *id,
            search_score: suggestion_score,
            fit_score: fit,
            final_score,
        });
    }

    hits.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal).then(a.candidate_id.cmp(&b.candidate_id)));
    hits.truncate(k);
    hits
}

fn genre_counts_for(ctx: &RetrievalContext<'_>, ids: &[Uuid]) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for id in ids {
        if let Some(c) = ctx.catalog.get(id) {
            for genre in &c.genres {
                *counts.entry(genre.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

fn median(values: &[u32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f32 / 2.0
    } else {
        sorted[mid] as f32
    }
}

fn popular_fallback(ctx: &RetrievalContext<'_>, exclude: &[Uuid], k: usize) -> Vec<EnrichedHit> {
    let exclude_set: std::collections::HashSet<Uuid> = exclude.iter().copied().collect();
    let mut candidates: Vec<&Candidate> = ctx.catalog.values().filter(|c| c.active && !exclude_set.contains(&c.candidate_id)).collect();
    candidates.sort_by(|a, b| {
        let score_a = a.popularity * a.rating;
        let score_b = b.popularity * b.rating;
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal).then(a.candidate_id.cmp(&b.candidate_id))
    });
    candidates
        .into_iter()
        .take(k)
        .map(|c| EnrichedHit {
            candidate_id: c.candidate_id,
            search_score: 0.0,
            fit_score: None,
            final_score: 0.0,
        })
        .collect()
}

fn genre_balanced_round_robin(ctx: &RetrievalContext<'_>, exclude: &std::collections::HashSet<Uuid>, k: usize) -> Vec<EnrichedHit> {
    let mut by_genre: HashMap<String, Vec<&Candidate>> = HashMap::new();
    for c in ctx.catalog.values() {
        if !c.active || exclude.contains(&c.candidate_id) {
            continue;
        }
        for genre in &c.genres {
            by_genre.entry(genre.clone()).or_default().push(c);
        }
    }
    for bucket in by_genre.values_mut() {
        bucket.sort_by(|a, b| b.popularity.partial_cmp(&a.popularity).unwrap_or(std::cmp::Ordering::Equal).then(a.candidate_id.cmp(&b.candidate_id)));
    }

    let mut genres: Vec<String> = by_genre.keys().cloned().collect();
    genres.sort();

    let mut seen = std::collections::HashSet::new();
    let mut hits = Vec::new();
    let mut cursor = 0usize;
    while hits.len() < k && !genres.is_empty() {
        let mut advanced = false;
        for genre in &genres {
            if hits.len() >= k {
                break;
            }
            if let Some(candidate) = by_genre[genre].get(cursor) {
                if seen.insert(candidate.candidate_id) {
                    hits.push(EnrichedHit {
                        candidate_id: candidate.candidate_id,
                        search_score: 0.0,
                        fit_score: None,
                        final_score: 0.0,
                    });
                    advanced = true;
                }
            }
        }
        cursor += 1;
        if !advanced {
            break;
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_handles_even_and_odd_counts() {
        assert_eq!(median(&[1, 2, 3]), 2.0);
        assert_eq!(median(&[1, 2, 3, 4]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }
}
