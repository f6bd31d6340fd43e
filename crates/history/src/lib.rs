//! C14 Watch-History Store: an append-only per-user viewing event log,
//! grounded on the `watch_history` table and `WatchHistoryManager` wiring
//! used for resume-position tracking elsewhere in the corpus, generalized
//! from a single upserted row per `(user, content)` to an append-only log
//! keyed by `(user, trakt_id, watched_at)` with denormalized catalog
//! metadata so history queries never need to join back against the
//! catalog.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE watch_history (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     user_id UUID NOT NULL,
//!     trakt_id BIGINT NOT NULL,
//!     media_type TEXT NOT NULL,
//!     watched_at TIMESTAMPTZ NOT NULL,
//!     title TEXT NOT NULL,
//!     year INT,
//!     genres TEXT[] NOT NULL DEFAULT '{}',
//!     keywords TEXT[] NOT NULL DEFAULT '{}',
//!     overview TEXT NOT NULL DEFAULT '',
//!     poster TEXT,
//!     runtime_minutes INT,
//!     language TEXT,
//!     UNIQUE(user_id, trakt_id, watched_at)
//! );
//!
//! CREATE INDEX idx_watch_history_user_id ON watch_history(user_id);
//! CREATE INDEX idx_watch_history_user_trakt ON watch_history(user_id, trakt_id);
//! CREATE INDEX idx_watch_history_watched_at ON watch_history(watched_at DESC);
//! ```

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};
use taste_catalog::{Candidate, MediaType};
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// A single watch event, denormalized with enough catalog metadata to
/// answer history queries without a join.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub user_id: Uuid,
    pub trakt_id: i64,
    pub media_type: MediaType,
    pub watched_at: DateTime<Utc>,
    pub title: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub keywords: Vec<String>,
    pub overview: String,
    pub poster: Option<String>,
    pub runtime_minutes: Option<i32>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WatchedStatus {
    pub watched_at: DateTime<Utc>,
    pub plays: u32,
}

#[derive(Debug, Clone, Default)]
pub struct WatchStats {
    pub total_watched: u64,
    pub movies_watched: u64,
    pub shows_watched: u64,
    pub total_runtime_minutes: i64,
    pub first_watch: Option<DateTime<Utc>>,
    pub last_watch: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct EnrichedCandidate {
    pub candidate: Candidate,
    pub is_watched: bool,
    pub watched_at: Option<DateTime<Utc>>,
}

pub struct WatchHistoryStore {
    pool: PgPool,
}

impl WatchHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a single watch event, ignoring the insert if the
    /// `(user_id, trakt_id, watched_at)` triple already exists.
    #[instrument(skip(self, event))]
    pub async fn record_watch(&self, event: &WatchEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watch_history (
                user_id, trakt_id, media_type, watched_at, title, year,
                genres, keywords, overview, poster, runtime_minutes, language
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id, trakt_id, watched_at) DO NOTHING
            "#,
        )
        .bind(event.user_id)
        .bind(event.trakt_id)
        .bind(event.media_type.as_str())
        .bind(event.watched_at)
        .bind(&event.title)
        .bind(event.year)
        .bind(&event.genres)
        .bind(&event.keywords)
        .bind(&event.overview)
        .bind(&event.poster)
        .bind(event.runtime_minutes)
        .bind(&event.language)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk-inserts a batch of events, ignoring conflicts on the
    /// uniqueness constraint. Attempts a single multi-row insert first;
    /// if that statement fails for any reason, falls back to inserting
    /// each row individually so one bad row never loses the whole batch.
    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn bulk_insert(&self, events: &[WatchEvent]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        match self.bulk_insert_single_statement(events).await {
            Ok(inserted) => Ok(inserted),
            Err(err) => {
                warn!(error = %err, "bulk insert failed, falling back to per-row insert-ignore");
                let mut inserted = 0u64;
                for event in events {
                    let before = self.count_for(event.user_id, event.trakt_id, event.watched_at).await?;
                    self.record_watch(event).await?;
                    let after = self.count_for(event.user_id, event.trakt_id, event.watched_at).await?;
                    if after > before {
                        inserted += 1;
                    }
                }
                Ok(inserted)
            }
        }
    }

    async fn bulk_insert_single_statement(&self, events: &[WatchEvent]) -> Result<u64> {
        let mut user_ids = Vec::with_capacity(events.len());
        let mut trakt_ids = Vec::with_capacity(events.len());
        let mut media_types = Vec::with_capacity(events.len());
        let mut watched_ats = Vec::with_capacity(events.len());
        let mut titles = Vec::with_capacity(events.len());
        let mut years = Vec::with_capacity(events.len());
        let mut overviews = Vec::with_capacity(events.len());
        let mut posters = Vec::with_capacity(events.len());
        let mut runtimes = Vec::with_capacity(events.len());
        let mut languages = Vec::with_capacity(events.len());

        for event in events {
            user_ids.push(event.user_id);
            trakt_ids.push(event.trakt_id);
            media_types.push(event.media_type.as_str().to_string());
            watched_ats.push(event.watched_at);
            titles.push(event.title.clone());
            years.push(event.year);
            overviews.push(event.overview.clone());
            posters.push(event.poster.clone());
            runtimes.push(event.runtime_minutes);
            languages.push(event.language.clone());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO watch_history (
                user_id, trakt_id, media_type, watched_at, title, year, overview, poster, runtime_minutes, language
            )
            SELECT * FROM UNNEST(
                $1::uuid[], $2::bigint[], $3::text[], $4::timestamptz[], $5::text[],
                $6::int[], $7::text[], $8::text[], $9::int[], $10::text[]
            )
            ON CONFLICT (user_id, trakt_id, watched_at) DO NOTHING
            "#,
        )
        .bind(&user_ids)
        .bind(&trakt_ids)
        .bind(&media_types)
        .bind(&watched_ats)
        .bind(&titles)
        .bind(&years)
        .bind(&overviews)
        .bind(&posters)
        .bind(&runtimes)
        .bind(&languages)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_for(&self, user_id: Uuid, trakt_id: i64, watched_at: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM watch_history WHERE user_id = $1 AND trakt_id = $2 AND watched_at = $3")
            .bind(user_id)
            .bind(trakt_id)
            .bind(watched_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    #[instrument(skip(self))]
    pub async fn get_watched_ids(&self, user_id: Uuid, media_type: Option<MediaType>) -> Result<HashSet<i64>> {
        let rows = sqlx::query("SELECT DISTINCT trakt_id FROM watch_history WHERE user_id = $1 AND ($2::text IS NULL OR media_type = $2)")
            .bind(user_id)
            .bind(media_type.map(|m| m.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| Ok(r.try_get::<i64, _>("trakt_id")?)).collect()
    }

    #[instrument(skip(self))]
    pub async fn get_watched_status_map(&self, user_id: Uuid, media_type: Option<MediaType>) -> Result<HashMap<i64, WatchedStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT trakt_id, MAX(watched_at) AS watched_at, COUNT(*) AS plays
            FROM watch_history
            WHERE user_id = $1 AND ($2::text IS NULL OR media_type = $2)
            GROUP BY trakt_id
            "#,
        )
        .bind(user_id)
        .bind(media_type.map(|m| m.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let trakt_id: i64 = row.try_get("trakt_id")?;
            let watched_at: DateTime<Utc> = row.try_get("watched_at")?;
            let plays: i64 = row.try_get("plays")?;
            map.insert(trakt_id, WatchedStatus { watched_at, plays: plays as u32 });
        }
        Ok(map)
    }

    #[instrument(skip(self))]
    pub async fn get_watch_stats(&self, user_id: Uuid) -> Result<WatchStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_watched,
                COUNT(*) FILTER (WHERE media_type = 'movie') AS movies_watched,
                COUNT(*) FILTER (WHERE media_type = 'show') AS shows_watched,
                COALESCE(SUM(runtime_minutes), 0) AS total_runtime_minutes,
                MIN(watched_at) AS first_watch,
                MAX(watched_at) AS last_watch
            FROM watch_history
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(WatchStats {
            total_watched: row.try_get::<i64, _>("total_watched")? as u64,
            movies_watched: row.try_get::<i64, _>("movies_watched")? as u64,
            shows_watched: row.try_get::<i64, _>("shows_watched")? as u64,
            total_runtime_minutes: row.try_get("total_runtime_minutes")?,
            first_watch: row.try_get("first_watch")?,
            last_watch: row.try_get("last_watch")?,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_top_genres(&self, user_id: Uuid, k: usize) -> Result<Vec<(String, u32)>> {
        let rows = sqlx::query(
            r#"
            SELECT genre, COUNT(*) AS n
            FROM watch_history, UNNEST(genres) AS genre
            WHERE user_id = $1
            GROUP BY genre
            ORDER BY n DESC, genre ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| Ok((r.try_get::<String, _>("genre")?, r.try_get::<i64, _>("n")? as u32))).collect()
    }

    #[instrument(skip(self))]
    pub async fn get_recent_watches(&self, user_id: Uuid, limit: usize, media_type: Option<MediaType>) -> Result<Vec<WatchEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, trakt_id, media_type, watched_at, title, year, genres, keywords,
                   overview, poster, runtime_minutes, language
            FROM watch_history
            WHERE user_id = $1 AND ($2::text IS NULL OR media_type = $2)
            ORDER BY watched_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(media_type.map(|m| m.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let media_type_str: String = r.try_get("media_type")?;
                Ok(WatchEvent {
                    user_id: r.try_get("user_id")?,
                    trakt_id: r.try_get("trakt_id")?,
                    media_type: MediaType::parse_loose(&media_type_str).unwrap_or(MediaType::Movie),
                    watched_at: r.try_get("watched_at")?,
                    title: r.try_get("title")?,
                    year: r.try_get("year")?,
                    genres: r.try_get("genres")?,
                    keywords: r.try_get("keywords")?,
                    overview: r.try_get("overview")?,
                    poster: r.try_get("poster")?,
                    runtime_minutes: r.try_get("runtime_minutes")?,
                    language: r.try_get("language")?,
                })
            })
            .collect()
    }
}

/// Stamps each candidate with whether it appears in `watched`, and when.
/// Pure function over an already-fetched status map so callers can batch
/// the single store round trip across an entire candidate list.
pub fn enrich_candidates_with_watched_status(candidates: Vec<Candidate>, watched: &HashMap<i64, WatchedStatus>) -> Vec<EnrichedCandidate> {
    candidates
        .into_iter()
        .map(|candidate| {
            let status = candidate.trakt_id.and_then(|id| watched.get(&id));
            EnrichedCandidate {
                is_watched: status.is_some(),
                watched_at: status.map(|s| s.watched_at),
                candidate,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use taste_catalog::TvFields;

    fn candidate(trakt_id: Option<i64>) -> Candidate {
        Candidate {
            candidate_id: Uuid::new_v4(),
            tmdb_id: 1,
            trakt_id,
            media_type: MediaType::Movie,
            title: "T".into(),
            original_title: "T".into(),
            year: Some(2020),
            overview: String::new(),
            tagline: String::new(),
            genres: vec![],
            keywords: vec![],
            cast: vec![],
            directors: vec![],
            writers: vec![],
            production_companies: vec![],
            production_countries: vec![],
            spoken_languages: vec![],
            runtime_minutes: None,
            rating: 7.0,
            votes: 10,
            popularity: 1.0,
            original_language: "en".into(),
            release_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            status: "Released".into(),
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

    #[test]
    fn enrich_marks_matching_trakt_id_as_watched() {
        let mut watched = HashMap::new();
        let now = Utc::now();
        watched.insert(42, WatchedStatus { watched_at: now, plays: 2 });

        let candidates = vec![candidate(Some(42)), candidate(Some(7)), candidate(None)];
        let enriched = enrich_candidates_with_watched_status(candidates, &watched);

        assert!(enriched[0].is_watched);
        assert_eq!(enriched[0].watched_at, Some(now));
        assert!(!enriched[1].is_watched);
        assert!(!enriched[2].is_watched);
    }

    #[test]
    fn enrich_handles_empty_watched_map() {
        let enriched = enrich_candidates_with_watched_status(vec![candidate(Some(1))], &HashMap::new());
        assert!(!enriched[0].is_watched);
        assert!(enriched[0].watched_at.is_none());
    }
}
