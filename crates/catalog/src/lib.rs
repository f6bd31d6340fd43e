//! The `Candidate` data model (§3) shared by every retrieval and scoring
//! component. Field list follows the 24-field catalog metadata contract
//! named in §4.3/§6, plus the derived obscurity/mainstream/freshness
//! scores and the TV-only fields.

pub mod provider;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Show,
}

impl MediaType {
    /// `show` is synonymous with `tv`/`series` per §4.8 step 1.
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "movie" | "movies" | "film" | "films" => Some(MediaType::Movie),
            "show" | "shows" | "tv" | "tvshow" | "series" => Some(MediaType::Show),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Show => "show",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TvFields {
    pub season_count: Option<u32>,
    pub episode_count: Option<u32>,
    pub episode_runtimes: Vec<u32>,
    pub first_air_date: Option<NaiveDate>,
    pub last_air_date: Option<NaiveDate>,
    pub in_production: Option<bool>,
    pub created_by: Vec<String>,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: Uuid,
    pub tmdb_id: i64,
    pub trakt_id: Option<i64>,
    pub media_type: MediaType,

    pub title: String,
    pub original_title: String,
    pub year: Option<i32>,
    pub overview: String,
    pub tagline: String,

    pub genres: Vec<String>,
    pub keywords: Vec<String>,
    pub cast: Vec<String>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub production_companies: Vec<String>,
    pub production_countries: Vec<String>,
    pub spoken_languages: Vec<String>,

    pub runtime_minutes: Option<u32>,
    pub rating: f32,
    pub votes: u64,
    pub popularity: f32,
    pub original_language: String,
    pub release_date: Option<NaiveDate>,
    pub status: String,
    pub adult: bool,
    pub revenue: Option<i64>,
    pub budget: Option<i64>,
    pub homepage: Option<String>,

    pub tv: TvFields,

    pub obscurity_score: f32,
    pub mainstream_score: f32,
    pub freshness_score: f32,

    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn year_or_from_date(&self) -> Option<i32> {
        self.year.or_else(|| {
            self.release_date
                .map(|d| d.format("%Y").to_string().parse().ok())
                .flatten()
        })
    }

    pub fn is_movie(&self) -> bool {
        matches!(self.media_type, MediaType::Movie)
    }
}

/// Composes the text fed to the encoder (§4.3) and to the TF-IDF
/// vectorizer (§4.8 step 3). Fields are joined with ". ", skipping empty
/// values, in the exact field order named in the spec.
pub fn compose_candidate_text(c: &Candidate) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut push = |s: String| {
        if !s.trim().is_empty() {
            parts.push(s);
        }
    };

    push(c.title.clone());
    push(c.original_title.clone());
    push(c.overview.clone());
    push(c.tagline.clone());
    push(c.media_type.as_str().to_string());
    push(c.genres.join(", "));
    push(c.keywords.join(", "));
    push(c.production_companies.join(", "));
    push(c.production_countries.join(", "));
    push(c.spoken_languages.join(", "));
    push(c.cast.join(", "));
    push(c.directors.join(", "));
    push(c.writers.join(", "));
    push(c.tv.created_by.join(", "));
    if let Some(y) = c.year_or_from_date() {
        push(y.to_string());
    }
    if let Some(d) = c.release_date {
        push(d.to_string());
    }
    if let Some(rt) = c.runtime_minutes {
        push(format!("{rt} minutes"));
    }
    push(c.status.clone());
    push(c.tv.networks.join(", "));
    if let Some(s) = c.tv.season_count {
        push(format!("{s} seasons"));
    }
    if let Some(e) = c.tv.episode_count {
        push(format!("{e} episodes"));
    }
    if !c.tv.episode_runtimes.is_empty() {
        push(
            c.tv.episode_runtimes
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    if let Some(d) = c.tv.first_air_date {
        push(d.to_string());
    }
    if let Some(d) = c.tv.last_air_date {
        push(d.to_string());
    }
    if let Some(in_prod) = c.tv.in_production {
        push(if in_prod {
            "Currently in production".to_string()
        } else {
            "Series completed".to_string()
        });
    }
    push(format!("{:.1}", c.popularity));
    push(format!("{:.1}", c.rating));
    push(c.votes.to_string());
    if let Some(r) = c.revenue {
        push(r.to_string());
    }
    if let Some(b) = c.budget {
        push(b.to_string());
    }
    push(c.original_language.clone());
    if let Some(h) = &c.homepage {
        push(h.clone());
    }

    parts.join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Candidate {
        Candidate {
            candidate_id: Uuid::nil(),
            tmdb_id: 1,
            trakt_id: None,
            media_type: MediaType::Movie,
            title: "Inception".into(),
            original_title: "Inception".into(),
            year: Some(2010),
            overview: "A thief who steals corporate secrets.".into(),
            tagline: "Your mind is the scene of the crime.".into(),
            genres: vec!["Sci-Fi".into(), "Thriller".into()],
            keywords: vec!["dream".into()],
            cast: vec!["Leonardo DiCaprio".into()],
            directors: vec!["Christopher Nolan".into()],
            writers: vec![],
            production_companies: vec!["Warner Bros".into()],
            production_countries: vec!["US".into()],
            spoken_languages: vec!["English".into()],
            runtime_minutes: Some(148),
            rating: 8.8,
            votes: 35000,
            popularity: 90.0,
            original_language: "en".into(),
            release_date: NaiveDate::from_ymd_opt(2010, 7, 16),
            status: "Released".into(),
            adult: false,
            revenue: None,
            budget: None,
            homepage: None,
            tv: TvFields::default(),
            obscurity_score: 0.1,
            mainstream_score: 0.9,
            freshness_score: 0.3,
            active: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn media_type_loose_parse_treats_show_tv_series_as_synonyms() {
        assert_eq!(MediaType::parse_loose("tv"), Some(MediaType::Show));
        assert_eq!(MediaType::parse_loose("series"), Some(MediaType::Show));
        assert_eq!(MediaType::parse_loose("Movies"), Some(MediaType::Movie));
        assert_eq!(MediaType::parse_loose("podcast"), None);
    }

    #[test]
    fn compose_text_skips_empty_fields_and_joins_with_period_space() {
        let text = compose_candidate_text(&sample());
        assert!(text.starts_with("Inception. Inception. A thief"));
        assert!(text.contains("movie"));
        assert!(!text.contains("..")); // no doubled separators from empty fields
    }
}
