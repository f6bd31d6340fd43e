//! C8 Scoring Engine: strict filtering, quick reduction, multi-signal
//! similarity scoring, and list-type-weighted blending. Grounded on the
//! weighted-config-with-`validate()` pattern from the corpus's ranking
//! module and the filter-struct shape from its search filters, with the
//! exact per-signal formulas following this core's own scoring contract.

pub mod filters;
pub mod tfidf;

use std::collections::{HashMap, HashSet};
use taste_catalog::Candidate;
use tracing::instrument;
use uuid::Uuid;

pub use filters::{GenreMode, SearchFilters};
pub use tfidf::TfIdfModel;

const TOPK_REDUCE: usize = 200;
const POPULARITY_WEIGHT_REDUCE: f32 = 0.3;
const RATING_WEIGHT_REDUCE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListType {
    Chat,
    Mood,
    Theme,
    Fusion,
}

#[derive(Debug, Clone, Copy)]
struct BlendWeights {
    sim: f32,
    semantic: f32,
    genre: f32,
    rating: f32,
    novelty: f32,
    phrase: f32,
    actor_studio: f32,
    recency: f32,
    watch_history: f32,
    tone: f32,
}

fn blend_weights(list_type: ListType) -> BlendWeights {
    match list_type {
        ListType::Chat => BlendWeights {
            sim: 0.25,
            semantic: 0.25,
            genre: 0.08,
            rating: 0.10,
            novelty: 0.05,
            phrase: 0.05,
            actor_studio: 0.08,
            recency: 0.05,
            watch_history: 0.09,
            tone: 0.00,
        },
        ListType::Mood => BlendWeights {
            sim: 0.15,
            semantic: 0.20,
            genre: 0.10,
            rating: 0.10,
            novelty: -0.15,
            phrase: 0.08,
            actor_studio: 0.08,
            recency: 0.15,
            watch_history: 0.09,
            tone: 0.01,
        },
        ListType::Theme => BlendWeights {
            sim: 0.15,
            semantic: 0.20,
            genre: 0.10,
            rating: 0.10,
            novelty: -0.15,
            phrase: 0.08,
            actor_studio: 0.08,
            recency: 0.15,
            watch_history: 0.09,
            tone: 0.01,
        },
        ListType::Fusion => BlendWeights {
            sim: 0.10,
            semantic: 0.25,
            genre: 0.10,
            rating: 0.10,
            novelty: -0.15,
            phrase: 0.05,
            actor_studio: 0.08,
            recency: 0.15,
            watch_history: 0.12,
            tone: 0.01,
        },
    }
}

const TONE_CUES: [&str; 4] = ["light", "cozy", "wholesome", "warm"];

#[derive(Debug, Clone, Default)]
pub struct WatchHistoryContext {
    pub watched_trakt_ids: HashSet<i64>,
    pub recent_media_types: Vec<taste_catalog::MediaType>,
    pub thumbs_up: HashSet<Uuid>,
    pub thumbs_down: HashSet<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreRequest<'a> {
    pub prompt_text: &'a str,
    pub quoted_phrases: &'a [String],
    pub requested_actors: &'a [String],
    pub requested_studios: &'a [String],
    pub tones: &'a [String],
    pub filters: SearchFilters,
    pub list_type: Option<ListType>,
    pub query_embedding: Option<&'a [f32]>,
    pub candidate_embeddings: Option<&'a HashMap<Uuid, Vec<f32>>>,
    pub watch_history: Option<&'a WatchHistoryContext>,
    pub mood_time_genre_adjustment: Option<&'a HashMap<String, f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct SignalValues {
    pub tfidf_sim: f32,
    pub semantic_sim: f32,
    pub genre_overlap: f32,
    pub phrase_bonus: f32,
    pub actor_studio_bonus: f32,
    pub recency_bonus: f32,
    pub watch_history_bonus: f32,
    pub ratings_boost: f32,
    pub tone_bonus: f32,
    pub mood_time_bonus: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ExplanationMeta {
    pub dominant_signal: String,
    pub top_drivers: Vec<(String, f32)>,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate_id: Uuid,
    pub score: f32,
    pub signals: SignalValues,
    pub explanation_meta: ExplanationMeta,
}

/// Runs the four-step scoring pipeline over `candidates`.
#[instrument(skip(candidates, candidate_texts, request))]
pub fn score(candidates: &[Candidate], candidate_texts: &HashMap<Uuid, String>, request: &ScoreRequest<'_>) -> Vec<ScoredCandidate> {
    // Step 1: strict filtering.
    let retained: Vec<&Candidate> = candidates.iter().filter(|c| c.active && filters::passes(c, &request.filters)).collect();
    if retained.is_empty() {
        return Vec::new();
    }

    // Step 2: quick reduction by popularity/rating composite.
    let max_pop = retained.iter().map(|c| c.popularity).fold(0.0f32, f32::max).max(1.0);
    let max_rating = retained.iter().map(|c| c.rating).fold(0.0f32, f32::max).max(1.0);
    let mut with_composite: Vec<(&Candidate, f32)> = retained
        .into_iter()
        .map(|c| {
            let pop_norm = c.popularity / max_pop;
            let rating_norm = c.rating / max_rating;
            (c, POPULARITY_WEIGHT_REDUCE * pop_norm + RATING_WEIGHT_REDUCE * rating_norm)
        })
        .collect();
    with_composite.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    with_composite.truncate(TOPK_REDUCE);
    let reduced: Vec<&Candidate> = with_composite.into_iter().map(|(c, _)| c).collect();

    // Step 3: similarity signals over the retained set.
    let docs: Vec<String> = reduced
        .iter()
        .map(|c| candidate_texts.get(&c.candidate_id).cloned().unwrap_or_else(|| taste_catalog::compose_candidate_text(c)))
        .collect();
    let tfidf_model = TfIdfModel::fit(&docs);
    let normalized_prompt = request.prompt_text.to_lowercase();

    let list_type = request.list_type.unwrap_or(ListType::Chat);
    let weights = blend_weights(list_type);

    let mut scored = Vec::with_capacity(reduced.len());
    for candidate in reduced {
        let text = candidate_texts
            .get(&candidate.candidate_id)
            .cloned()
            .unwrap_or_else(|| taste_catalog::compose_candidate_text(candidate));

        let tfidf_sim = tfidf_model.cosine(&normalized_prompt, &text);

        let semantic_sim = match (request.query_embedding, request.candidate_embeddings) {
            (Some(q), Some(map)) => map
                .get(&candidate.candidate_id)
                .map(|emb| taste_core::math::remap_cosine_unit(taste_core::math::cosine_similarity(q, emb)))
                .unwrap_or(0.0),
            _ => 0.0,
        };

        let genre_overlap = {
            let wanted: HashSet<String> = request.filters.genres.iter().map(|g| g.to_lowercase()).collect();
            let have: HashSet<String> = candidate.genres.iter().map(|g| g.to_lowercase()).collect();
            taste_core::math::jaccard(&wanted, &have)
        };

        let phrase_bonus = if request.quoted_phrases.is_empty() {
            0.0
        } else {
            let lower = text.to_lowercase();
            let matched = request.quoted_phrases.iter().filter(|p| lower.contains(&p.to_lowercase())).count();
            matched as f32 / request.quoted_phrases.len() as f32
        };

        let actor_studio_bonus = {
            let requested: Vec<&String> = request.requested_actors.iter().chain(request.requested_studios.iter()).collect();
            if requested.is_empty() {
                0.0
            } else {
                let matched = requested
                    .iter()
                    .filter(|r| {
                        let r = r.to_lowercase();
                        candidate.cast.iter().any(|c| c.to_lowercase().contains(&r))
                            || candidate.production_companies.iter().any(|c| c.to_lowercase().contains(&r))
                    })
                    .count();
                matched as f32 / requested.len() as f32
            }
        };

        let applies_recency = matches!(list_type, ListType::Mood | ListType::Theme | ListType::Fusion)
            || (list_type == ListType::Chat && request.filters.year_range.is_none() && request.filters.years.is_empty());
        let recency_bonus = if applies_recency {
            match candidate.year_or_from_date() {
                Some(year) if year >= 1970 => ((year - 1970) as f32 / (2025 - 1970) as f32).clamp(0.0, 1.0),
                Some(_) => -0.3,
                None => 0.0,
            }
        } else {
            0.0
        };

        let watch_history_bonus = match request.watch_history {
            Some(ctx) => {
                if let Some(trakt_id) = candidate.trakt_id {
                    if ctx.watched_trakt_ids.contains(&trakt_id) {
                        -0.5
                    } else {
                        same_media_type_bonus(ctx, candidate)
                    }
                } else {
                    same_media_type_bonus(ctx, candidate)
                }
            }
            None => 0.0,
        };

        let rating_norm = candidate.rating / 10.0;
        let ratings_boost = match request.watch_history {
            Some(ctx) if ctx.thumbs_up.contains(&candidate.candidate_id) => 0.3,
            Some(ctx) if ctx.thumbs_down.contains(&candidate.candidate_id) => -0.7,
            _ => 0.0,
        };

        let tone_bonus = if request.tones.iter().any(|t| TONE_CUES.contains(&t.to_lowercase().as_str())) {
            0.5 * rating_norm
        } else {
            0.0
        };

        let mood_time_bonus = match request.mood_time_genre_adjustment {
            Some(adjustments) => candidate
                .genres
                .iter()
                .filter_map(|g| adjustments.get(g))
                .map(|adj| 0.5 * adj)
                .sum(),
            None => 0.0,
        };

        let novelty = 1.0 - (candidate.popularity / 100.0).clamp(0.0, 1.0);

        let signals = SignalValues {
            tfidf_sim,
            semantic_sim,
            genre_overlap,
            phrase_bonus,
            actor_studio_bonus,
            recency_bonus,
            watch_history_bonus,
            ratings_boost,
            tone_bonus,
            mood_time_bonus,
        };

        let base = weights.sim * signals.tfidf_sim
            + weights.semantic * signals.semantic_sim
            + weights.genre * signals.genre_overlap
            + weights.rating * rating_norm
            + weights.novelty * novelty
            + weights.phrase * signals.phrase_bonus
            + weights.actor_studio * signals.actor_studio_bonus
            + weights.recency * signals.recency_bonus
            + weights.watch_history * signals.watch_history_bonus
            + weights.tone * signals.tone_bonus
            + signals.mood_time_bonus;

        let final_score = base * (1.0 + signals.ratings_boost);

        let explanation_meta = explain(&signals);

        scored.push(ScoredCandidate {
            candidate_id: candidate.candidate_id,
            score: final_score,
            signals,
            explanation_meta,
        });
    }

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.candidate_id.cmp(&b.candidate_id)));
    scored
}

fn same_media_type_bonus(ctx: &WatchHistoryContext, candidate: &Candidate) -> f32 {
    if ctx.recent_media_types.is_empty() {
        return 0.0;
    }
    let matching = ctx.recent_media_types.iter().filter(|mt| **mt == candidate.media_type).count();
    let ratio = matching as f32 / ctx.recent_media_types.len() as f32;
    if ratio >= 0.6 {
        0.1
    } else {
        0.0
    }
}

fn explain(signals: &SignalValues) -> ExplanationMeta {
    let mut drivers = vec![
        ("tfidf_sim".to_string(), signals.tfidf_sim),
        ("semantic_sim".to_string(), signals.semantic_sim),
        ("genre_overlap".to_string(), signals.genre_overlap),
        ("phrase_bonus".to_string(), signals.phrase_bonus),
        ("actor_studio_bonus".to_string(), signals.actor_studio_bonus),
        ("recency_bonus".to_string(), signals.recency_bonus),
        ("tone_bonus".to_string(), signals.tone_bonus),
    ];
    drivers.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let dominant_signal = drivers.first().map(|(name, _)| name.clone()).unwrap_or_default();
    drivers.truncate(3);
    ExplanationMeta {
        dominant_signal,
        top_drivers: drivers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taste_catalog::MediaType;

    fn sample_candidate(id: Uuid, genre: &str, year: i32, popularity: f32, rating: f32) -> Candidate {
        Candidate {
            candidate_id: id,
            tmdb_id: 1,
            trakt_id: None,
            media_type: MediaType::Movie,
            title: "Sample".into(),
            original_title: "Sample".into(),
            year: Some(year),
            overview: "a cozy romantic comedy".into(),
            tagline: String::new(),
            genres: vec![genre.into()],
            keywords: vec![],
            cast: vec![],
            directors: vec![],
            writers: vec![],
            production_companies: vec![],
            production_countries: vec![],
            spoken_languages: vec![],
            runtime_minutes: Some(100),
            rating,
            votes: 100,
            popularity,
            original_language: "en".into(),
            release_date: None,
            status: "Released".into(),
            adult: false,
            revenue: None,
            budget: None,
            homepage: None,
            tv: Default::default(),
            obscurity_score: 0.0,
            mainstream_score: 0.0,
            freshness_score: 0.0,
            active: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn strict_filters_exclude_non_matching_candidates() {
        let a = sample_candidate(Uuid::new_v4(), "Comedy", 2015, 40.0, 7.0);
        let b = sample_candidate(Uuid::new_v4(), "Horror", 2015, 40.0, 7.0);
        let filters = SearchFilters {
            genres: vec!["Comedy".into()],
            ..Default::default()
        };
        let request = ScoreRequest {
            filters,
            ..Default::default()
        };
        let mut texts = HashMap::new();
        texts.insert(a.candidate_id, taste_catalog::compose_candidate_text(&a));
        texts.insert(b.candidate_id, taste_catalog::compose_candidate_text(&b));

        let results = score(&[a.clone(), b], &texts, &request);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].candidate_id, a.candidate_id);
    }

    #[test]
    fn tone_bonus_applies_when_prompt_tone_matches() {
        let a = sample_candidate(Uuid::new_v4(), "Comedy", 2015, 40.0, 8.0);
        let mut texts = HashMap::new();
        texts.insert(a.candidate_id, taste_catalog::compose_candidate_text(&a));
        let tones = vec!["cozy".to_string()];
        let request = ScoreRequest {
            tones: &tones,
            ..Default::default()
        };
        let results = score(&[a], &texts, &request);
        assert!(results[0].signals.tone_bonus > 0.0);
    }

    #[test]
    fn empty_candidates_yields_empty_result() {
        let request = ScoreRequest::default();
        let results = score(&[], &HashMap::new(), &request);
        assert!(results.is_empty());
    }
}
