//! The §6 "Catalog metadata provider" and read-side "Watch-history
//! provider" collaborator contracts, named as traits so the core can be
//! built against a fake in tests without a live database.

use crate::{Candidate, MediaType};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("candidate not found: {0}")]
    NotFound(String),
    #[error("catalog backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn fetch(&self, media_type: MediaType, tmdb_id: i64) -> Result<Candidate, CatalogError>;
    async fn get_by_id(&self, candidate_id: Uuid) -> Result<Candidate, CatalogError>;
    async fn get_many(&self, candidate_ids: &[Uuid]) -> Result<Vec<Candidate>, CatalogError>;
}

/// An in-memory provider for tests and for small deployments that load
/// the whole catalog into process memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    items: std::collections::HashMap<Uuid, Candidate>,
}

impl InMemoryCatalog {
    pub fn new(items: Vec<Candidate>) -> Self {
        Self {
            items: items.into_iter().map(|c| (c.candidate_id, c)).collect(),
        }
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn fetch(&self, media_type: MediaType, tmdb_id: i64) -> Result<Candidate, CatalogError> {
        self.items
            .values()
            .find(|c| c.media_type == media_type && c.tmdb_id == tmdb_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("{media_type:?}/{tmdb_id}")))
    }

    async fn get_by_id(&self, candidate_id: Uuid) -> Result<Candidate, CatalogError> {
        self.items
            .get(&candidate_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(candidate_id.to_string()))
    }

    async fn get_many(&self, candidate_ids: &[Uuid]) -> Result<Vec<Candidate>, CatalogError> {
        Ok(candidate_ids
            .iter()
            .filter_map(|id| self.items.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TvFields;
    use chrono::Utc;

    fn candidate(id: Uuid, tmdb: i64) -> Candidate {
        Candidate {
            candidate_id: id,
            tmdb_id: tmdb,
            trakt_id: None,
            media_type: MediaType::Movie,
            title: "T".into(),
            original_title: "T".into(),
            year: Some(2020),
            overview: "".into(),
            tagline: "".into(),
            genres: vec![],
            keywords: vec![],
            cast: vec![],
            directors: vec![],
            writers: vec![],
            production_companies: vec![],
            production_countries: vec![],
            spoken_languages: vec![],
            runtime_minutes: None,
            rating: 0.0,
            votes: 0,
            popularity: 0.0,
            original_language: "en".into(),
            release_date: None,
            status: "".into(),
            adult: false,
            revenue: None,
            budget: None,
            homepage: None,
            tv: TvFields::default(),
            obscurity_score: 0.0,
            mainstream_score: 0.0,
            freshness_score: 0.0,
            active: true,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fetch_by_tmdb_and_media_type() {
        let id = Uuid::new_v4();
        let cat = InMemoryCatalog::new(vec![candidate(id, 42)]);
        let found = cat.fetch(MediaType::Movie, 42).await.unwrap();
        assert_eq!(found.candidate_id, id);
        assert!(cat.fetch(MediaType::Show, 42).await.is_err());
    }
}
