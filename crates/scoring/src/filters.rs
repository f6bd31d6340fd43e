//! Strict filtering (§4.8 step 1), grounded on the `SearchFilters`/
//! `ContentRating` shape used by the corpus's keyword-search filter layer,
//! generalized to the full field list this core's filters need.

use chrono::Datelike;
use std::collections::HashSet;
use taste_catalog::{Candidate, MediaType};
use taste_text::{Comparator, NumericConstraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenreMode {
    Any,
    All,
}

impl Default for GenreMode {
    fn default() -> Self {
        GenreMode::Any
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub media_type: Option<MediaType>,
    pub genres: Vec<String>,
    pub genre_mode: GenreMode,
    pub actors: Vec<String>,
    pub studios: Vec<String>,
    pub languages: Vec<String>,
    pub years: Vec<i32>,
    pub year_range: Option<(i32, i32)>,
    pub adult: Option<bool>,
    pub numeric_constraints: Vec<NumericConstraint>,
    pub networks: Vec<String>,
    pub creators: Vec<String>,
    pub directors: Vec<String>,
    pub countries: Vec<String>,
    pub in_production: Option<bool>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.media_type.is_none()
            && self.genres.is_empty()
            && self.actors.is_empty()
            && self.studios.is_empty()
            && self.languages.is_empty()
            && self.years.is_empty()
            && self.year_range.is_none()
            && self.adult.is_none()
            && self.numeric_constraints.is_empty()
            && self.networks.is_empty()
            && self.creators.is_empty()
            && self.directors.is_empty()
            && self.countries.is_empty()
            && self.in_production.is_none()
    }
}

fn any_substring_match(needles: &[String], haystack: &[String]) -> bool {
    needles.iter().any(|n| {
        let n = n.to_lowercase();
        haystack.iter().any(|h| h.to_lowercase().contains(&n))
    })
}

fn case_insensitive_contains(haystack: &[String], needle: &str) -> bool {
    haystack.iter().any(|h| h.eq_ignore_ascii_case(needle))
}

fn numeric_field_value(candidate: &Candidate, field: &str) -> Option<f64> {
    match field {
        "rating" => Some(candidate.rating as f64),
        "votes" => Some(candidate.votes as f64),
        "revenue" => candidate.revenue.map(|v| v as f64),
        "budget" => candidate.budget.map(|v| v as f64),
        "popularity" => Some(candidate.popularity as f64),
        "seasons" => candidate.tv.season_count.map(|v| v as f64),
        "episodes" => candidate.tv.episode_count.map(|v| v as f64),
        "runtime" => candidate.runtime_minutes.map(|v| v as f64),
        _ => None,
    }
}

fn satisfies(value: f64, comparator: Comparator, threshold: f64) -> bool {
    match comparator {
        Comparator::Gt => value > threshold,
        Comparator::Gte => value >= threshold,
        Comparator::Lt => value < threshold,
        Comparator::Lte => value <= threshold,
        Comparator::Eq => (value - threshold).abs() < f64::EPSILON,
    }
}

/// Applies every active filter field; a candidate survives only if all
/// explicitly set fields hold.
pub fn passes(candidate: &Candidate, filters: &SearchFilters) -> bool {
    if let Some(media_type) = filters.media_type {
        if candidate.media_type != media_type {
            return false;
        }
    }

    if !filters.genres.is_empty() {
        let candidate_genres: HashSet<String> = candidate.genres.iter().map(|g| g.to_lowercase()).collect();
        let wanted: HashSet<String> = filters.genres.iter().map(|g| g.to_lowercase()).collect();
        let ok = match filters.genre_mode {
            GenreMode::Any => !candidate_genres.is_disjoint(&wanted),
            GenreMode::All => wanted.is_subset(&candidate_genres),
        };
        if !ok {
            return false;
        }
    }

    if !filters.actors.is_empty() && !any_substring_match(&filters.actors, &candidate.cast) {
        return false;
    }

    if !filters.studios.is_empty() && !any_substring_match(&filters.studios, &candidate.production_companies) {
        return false;
    }

    if !filters.languages.is_empty() {
        let matches = filters
            .languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&candidate.original_language));
        if !matches {
            return false;
        }
    }

    if let Some(year) = candidate.year_or_from_date() {
        if !filters.years.is_empty() && !filters.years.contains(&year) {
            return false;
        }
        if let Some((min, max)) = filters.year_range {
            if year < min || year > max {
                return false;
            }
        }
    } else if !filters.years.is_empty() || filters.year_range.is_some() {
        return false;
    }

    if let Some(adult) = filters.adult {
        if candidate.adult != adult {
            return false;
        }
    }

    for constraint in &filters.numeric_constraints {
        match numeric_field_value(candidate, &constraint.field) {
            Some(value) => {
                if !satisfies(value, constraint.comparator, constraint.threshold) {
                    return false;
                }
            }
            None => return false,
        }
    }

    if !filters.networks.is_empty() && !any_substring_match(&filters.networks, &candidate.tv.networks) {
        return false;
    }
    if !filters.creators.is_empty() && !any_substring_match(&filters.creators, &candidate.tv.created_by) {
        return false;
    }
    if !filters.directors.is_empty() && !any_substring_match(&filters.directors, &candidate.directors) {
        return false;
    }
    if !filters.countries.is_empty() {
        let ok = filters.countries.iter().any(|c| case_insensitive_contains(&candidate.production_countries, c));
        if !ok {
            return false;
        }
    }
    if let Some(in_production) = filters.in_production {
        if candidate.tv.in_production != Some(in_production) {
            return false;
        }
    }

    true
}

pub fn release_year_or_zero(candidate: &Candidate) -> i32 {
    candidate
        .year_or_from_date()
        .unwrap_or_else(|| candidate.updated_at.year())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn base_candidate() -> Candidate {
        Candidate {
            candidate_id: Uuid::new_v4(),
            tmdb_id: 1,
            trakt_id: None,
            media_type: MediaType::Movie,
            title: "Test".into(),
            original_title: "Test".into(),
            year: Some(2015),
            overview: String::new(),
            tagline: String::new(),
            genres: vec!["Comedy".into(), "Romance".into()],
            keywords: vec![],
            cast: vec!["Jane Actor".into()],
            directors: vec![],
            writers: vec![],
            production_companies: vec!["Indie Studio".into()],
            production_countries: vec!["ES".into()],
            spoken_languages: vec![],
            runtime_minutes: Some(95),
            rating: 7.5,
            votes: 500,
            popularity: 40.0,
            original_language: "es".into(),
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
    fn genre_any_mode_requires_one_overlap() {
        let candidate = base_candidate();
        let filters = SearchFilters {
            genres: vec!["Action".into(), "Romance".into()],
            genre_mode: GenreMode::Any,
            ..Default::default()
        };
        assert!(passes(&candidate, &filters));
    }

    #[test]
    fn genre_all_mode_requires_every_genre() {
        let candidate = base_candidate();
        let filters = SearchFilters {
            genres: vec!["Comedy".into(), "Action".into()],
            genre_mode: GenreMode::All,
            ..Default::default()
        };
        assert!(!passes(&candidate, &filters));
    }

    #[test]
    fn language_filter_is_case_insensitive() {
        let candidate = base_candidate();
        let filters = SearchFilters {
            languages: vec!["ES".into()],
            ..Default::default()
        };
        assert!(passes(&candidate, &filters));
    }

    #[test]
    fn numeric_constraint_enforced() {
        let candidate = base_candidate();
        let filters = SearchFilters {
            numeric_constraints: vec![NumericConstraint {
                field: "rating".into(),
                comparator: Comparator::Gte,
                threshold: 8.0,
            }],
            ..Default::default()
        };
        assert!(!passes(&candidate, &filters));
    }
}
