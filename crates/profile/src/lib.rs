//! C12 User Profile Service & Fit Scorer.
//!
//! Preference-vector construction follows `BuildUserPreferenceVector` and
//! its temporal-decay/engagement-weighting shape; fit scoring follows the
//! feature-similarity blend pattern, both generalized from a single
//! numeric embedding similarity to the full genre/similarity/popularity
//! weighting this core needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taste_catalog::Candidate;
use taste_vector_index::multi::VectorLabel;
use uuid::Uuid;

const RECENT_WINDOW_DAYS: i64 = 90;
const RECENT_WEIGHT_MULTIPLIER: f32 = 2.0;
const MAX_RECENT_TMDB_IDS: usize = 20;
const TOP_GENRE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObscurityPreference {
    Obscure,
    Balanced,
    Mainstream,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub candidate_id: Uuid,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UserRating {
    pub candidate_id: Uuid,
    pub thumbs_up: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub genre_weights: HashMap<String, f32>,
    pub decade_weights: HashMap<i32, f32>,
    pub language_weights: HashMap<String, f32>,
    pub preferred_obscurity: ObscurityPreference,
    pub top_genres: Vec<String>,
    pub recent_tmdb_ids: Vec<i64>,
    pub recent_embeddings: Vec<Vec<f32>>,
    pub built_at: DateTime<Utc>,
}

impl UserProfile {
    fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            genre_weights: HashMap::new(),
            decade_weights: HashMap::new(),
            language_weights: HashMap::new(),
            preferred_obscurity: ObscurityPreference::Balanced,
            top_genres: Vec::new(),
            recent_tmdb_ids: Vec::new(),
            recent_embeddings: Vec::new(),
            built_at: Utc::now(),
        }
    }
}

pub struct ProfileBuilder;

impl ProfileBuilder {
    /// Builds a profile from recent watch events and explicit ratings.
    /// `embeddings` supplies each candidate's base embedding when known.
    pub fn build(
        user_id: Uuid,
        events: &[WatchEvent],
        candidates: &HashMap<Uuid, Candidate>,
        embeddings: &HashMap<Uuid, Vec<f32>>,
    ) -> UserProfile {
        if events.is_empty() {
            return UserProfile::empty(user_id);
        }
        let now = Utc::now();

        let mut genre_counts: HashMap<String, f32> = HashMap::new();
        let mut decade_counts: HashMap<i32, f32> = HashMap::new();
        let mut language_counts: HashMap<String, f32> = HashMap::new();
        let mut popularity_sum = 0.0f32;
        let mut popularity_n = 0usize;

        let mut sorted_events = events.to_vec();
        sorted_events.sort_by(|a, b| b.watched_at.cmp(&a.watched_at));

        let mut recent_tmdb_ids = Vec::new();
        let mut recent_embeddings = Vec::new();
        let mut seen_tmdb = std::collections::HashSet::new();

        for event in &sorted_events {
            let Some(candidate) = candidates.get(&event.candidate_id) else {
                continue;
            };
            let days_since = (now - event.watched_at).num_days();
            let weight = if days_since <= RECENT_WINDOW_DAYS {
                RECENT_WEIGHT_MULTIPLIER
            } else {
                1.0
            };

            for genre in &candidate.genres {
                *genre_counts.entry(genre.clone()).or_insert(0.0) += weight;
            }
            if let Some(year) = candidate.year_or_from_date() {
                let decade = (year / 10) * 10;
                *decade_counts.entry(decade).or_insert(0.0) += weight;
            }
            if !candidate.original_language.is_empty() {
                *language_counts.entry(candidate.original_language.clone()).or_insert(0.0) += weight;
            }

            popularity_sum += candidate.popularity;
            popularity_n += 1;

            if recent_tmdb_ids.len() < MAX_RECENT_TMDB_IDS && seen_tmdb.insert(candidate.tmdb_id) {
                recent_tmdb_ids.push(candidate.tmdb_id);
            }
            if let Some(emb) = embeddings.get(&event.candidate_id) {
                recent_embeddings.push(emb.clone());
            }
        }

        let genre_weights = normalize_by_max(&genre_counts);
        let decade_weights = normalize_by_max(&decade_counts);
        let language_weights = normalize_by_max(&language_counts);

        let avg_popularity = if popularity_n > 0 {
            popularity_sum / popularity_n as f32
        } else {
            50.0
        };
        let preferred_obscurity = if avg_popularity < 20.0 {
            ObscurityPreference::Obscure
        } else if avg_popularity < 60.0 {
            ObscurityPreference::Balanced
        } else {
            ObscurityPreference::Mainstream
        };

        let mut top_genres: Vec<(String, f32)> = genre_weights.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top_genres.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top_genres = top_genres.into_iter().take(TOP_GENRE_COUNT).map(|(g, _)| g).collect();

        UserProfile {
            user_id,
            genre_weights,
            decade_weights,
            language_weights,
            preferred_obscurity,
            top_genres,
            recent_tmdb_ids,
            recent_embeddings,
            built_at: now,
        }
    }
}

fn normalize_by_max<K: Clone + std::hash::Hash + Eq>(counts: &HashMap<K, f32>) -> HashMap<K, f32> {
    let max = counts.values().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return HashMap::new();
    }
    counts.iter().map(|(k, v)| (k.clone(), v / max)).collect()
}

#[derive(Debug, Clone, Default)]
pub struct FitScore {
    pub genre_score: f32,
    pub similarity_score: f32,
    pub popularity_score: f32,
    pub fit: f32,
}

const DEFAULT_WEIGHTS: (f32, f32, f32) = (0.4, 0.4, 0.2);
const MAX_SHIFT: f32 = 0.2;

/// Computes the §4.12 fit score for one candidate against a profile.
pub fn fit_score(profile: &UserProfile, candidate: &Candidate, candidate_embedding: Option<&[f32]>) -> FitScore {
    let genre_score = if candidate.genres.is_empty() {
        0.3
    } else {
        let sum: f32 = candidate
            .genres
            .iter()
            .map(|g| *profile.genre_weights.get(g).unwrap_or(&0.1))
            .sum();
        sum / candidate.genres.len() as f32
    };

    let similarity_score = match candidate_embedding {
        Some(emb) if !profile.recent_embeddings.is_empty() => {
            let max_cos = profile
                .recent_embeddings
                .iter()
                .map(|r| taste_core::math::cosine_similarity(r, emb))
                .fold(f32::MIN, f32::max);
            taste_core::math::remap_cosine_unit(max_cos)
        }
        _ => 0.5,
    };

    let popularity_score = match profile.preferred_obscurity {
        ObscurityPreference::Balanced => {
            if (30.0..=70.0).contains(&candidate.popularity) {
                0.7
            } else {
                0.5
            }
        }
        ObscurityPreference::Obscure => 1.0 - (candidate.popularity / 100.0).clamp(0.0, 1.0),
        ObscurityPreference::Mainstream => (candidate.popularity / 100.0).clamp(0.0, 1.0),
    };

    let (mut wg, mut ws, wp) = DEFAULT_WEIGHTS;
    if profile.recent_embeddings.is_empty() && profile.genre_weights.is_empty() {
        let shift = MAX_SHIFT.min(ws);
        ws -= shift;
        wg += shift;
    }
    if candidate.genres.is_empty() {
        let shift = MAX_SHIFT.min(wg);
        wg -= shift;
        ws += shift;
    }

    let fit = (wg * genre_score + ws * similarity_score + wp * popularity_score).clamp(0.0, 1.0);

    FitScore {
        genre_score,
        similarity_score,
        popularity_score,
        fit,
    }
}

const MULTI_VECTOR_WEIGHTS: [(VectorLabel, f32); 5] = [
    (VectorLabel::Base, 0.20),
    (VectorLabel::Title, 0.25),
    (VectorLabel::Keywords, 0.30),
    (VectorLabel::People, 0.20),
    (VectorLabel::Brands, 0.05),
];

/// Blends a per-aspect multi-vector fit with the primary fit score, per
/// the §4.12 multi-vector fit variant. `profile_vectors` and
/// `candidate_vectors` are per-aspect embeddings keyed by label.
pub fn multi_vector_fit(
    profile_vectors: &HashMap<VectorLabel, Vec<f32>>,
    candidate_vectors: &HashMap<VectorLabel, Vec<f32>>,
    primary_fit: f32,
    primary_weight: f32,
) -> f32 {
    let mut aspect_sum = 0.0f32;
    let mut weight_sum = 0.0f32;
    for (label, weight) in MULTI_VECTOR_WEIGHTS {
        if let (Some(p), Some(c)) = (profile_vectors.get(&label), candidate_vectors.get(&label)) {
            let cos = taste_core::math::cosine_similarity(p, c);
            aspect_sum += weight * taste_core::math::remap_cosine_unit(cos);
            weight_sum += weight;
        }
    }
    let aspect_fit = if weight_sum > 0.0 { aspect_sum / weight_sum } else { primary_fit };
    (primary_weight * primary_fit + (1.0 - primary_weight) * aspect_fit).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use taste_catalog::MediaType;

    fn make_candidate(id: Uuid, genres: &[&str], popularity: f32, tmdb_id: i64) -> Candidate {
        Candidate {
            candidate_id: id,
            tmdb_id,
            trakt_id: None,
            media_type: MediaType::Movie,
            title: "Test".to_string(),
            original_title: "Test".to_string(),
            year: Some(2020),
            overview: String::new(),
            tagline: String::new(),
            genres: genres.iter().map(|s| s.to_string()).collect(),
            keywords: Vec::new(),
            cast: Vec::new(),
            directors: Vec::new(),
            writers: Vec::new(),
            production_companies: Vec::new(),
            production_countries: Vec::new(),
            spoken_languages: Vec::new(),
            runtime_minutes: Some(100),
            rating: 7.0,
            votes: 1000,
            popularity,
            original_language: "en".to_string(),
            release_date: None,
            status: "Released".to_string(),
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
    fn build_weighs_recent_events_higher() {
        let user_id = Uuid::new_v4();
        let recent_id = Uuid::new_v4();
        let old_id = Uuid::new_v4();
        let mut candidates = HashMap::new();
        candidates.insert(recent_id, make_candidate(recent_id, &["action"], 50.0, 1));
        candidates.insert(old_id, make_candidate(old_id, &["drama"], 50.0, 2));

        let events = vec![
            WatchEvent { candidate_id: recent_id, watched_at: Utc::now() - Duration::days(5) },
            WatchEvent { candidate_id: old_id, watched_at: Utc::now() - Duration::days(400) },
        ];

        let profile = ProfileBuilder::build(user_id, &events, &candidates, &HashMap::new());
        assert!(profile.genre_weights["action"] > profile.genre_weights["drama"]);
    }

    #[test]
    fn empty_events_yields_empty_profile() {
        let profile = ProfileBuilder::build(Uuid::new_v4(), &[], &HashMap::new(), &HashMap::new());
        assert!(profile.genre_weights.is_empty());
        assert_eq!(profile.preferred_obscurity, ObscurityPreference::Balanced);
    }

    #[test]
    fn fit_score_defaults_unknown_genre_to_point_one() {
        let profile = UserProfile::empty(Uuid::new_v4());
        let candidate = make_candidate(Uuid::new_v4(), &["horror"], 50.0, 5);
        let score = fit_score(&profile, &candidate, None);
        assert!((score.genre_score - 0.1).abs() < 1e-6);
    }

    #[test]
    fn fit_score_no_genres_uses_point_three() {
        let profile = UserProfile::empty(Uuid::new_v4());
        let candidate = make_candidate(Uuid::new_v4(), &[], 50.0, 6);
        let score = fit_score(&profile, &candidate, None);
        assert!((score.genre_score - 0.3).abs() < 1e-6);
    }
}
