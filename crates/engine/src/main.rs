//! Taste Engine - Recommendation and Ranking Service
//!
//! This binary owns no HTTP surface; it loads configuration, wires every
//! collaborator crate together, does the one-time catalog load, and then
//! idles until asked to shut down. The internal API surface (hybrid
//! search, chat-list generation, pairwise training, phase detection) is
//! consumed in-process by whatever host embeds this crate.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use taste_catalog::provider::{CatalogProvider, InMemoryCatalog};
use taste_catalog::{Candidate, MediaType, TvFields};
use taste_embedding::EmbeddingService;
use taste_engine::{Engine, EngineConfig, ListProvider, WatchEventProvider};
use taste_history::WatchHistoryStore;
use taste_lexical::LexicalIndex;
use taste_llm::LlmClient;
use taste_phases::PhaseItem;
use taste_profile::WatchEvent as ProfileWatchEvent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taste_core::config::load_dotenv();
    taste_core::telemetry::init_tracing("info");

    info!("starting taste engine");

    let config = EngineConfig::load();

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let catalog: Vec<Candidate> = load_catalog(&db_pool).await.unwrap_or_else(|err| {
        warn!(error = %err, "catalog load failed, starting with an empty catalog");
        Vec::new()
    });
    let catalog_count = catalog.len();

    let embedder = EmbeddingService::from_env().expect("failed to load embedding model");
    let lexical_index = LexicalIndex::new(&config.lexical_index_path).expect("failed to open lexical index");
    let llm = LlmClient::from_env();
    let cache = match taste_cache::TasteCache::new(&config.redis_url).await {
        Ok(c) => Some(c),
        Err(err) => {
            warn!(error = %err, "cache unavailable, continuing without it");
            None
        }
    };

    let catalog_provider: Arc<dyn CatalogProvider> = Arc::new(InMemoryCatalog::new(catalog.clone()));
    let list_provider: Arc<dyn ListProvider> = Arc::new(PgListProvider::new(db_pool.clone()));
    let watch_events: Arc<dyn WatchEventProvider> =
        Arc::new(PgWatchEventProvider::new(db_pool.clone(), catalog.clone()));

    let engine = Engine::new(
        config,
        catalog_provider,
        list_provider,
        Some(watch_events),
        embedder,
        lexical_index,
        cache,
        llm,
    );

    if catalog_count > 0 {
        match engine.ingest_catalog(catalog).await {
            Ok(n) => info!(indexed = n, "catalog indexed"),
            Err(err) => warn!(error = %err, "catalog indexing failed"),
        }
    }

    info!("taste engine ready");

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");

    Ok(())
}

async fn load_catalog(pool: &sqlx::PgPool) -> Result<Vec<Candidate>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT
            candidate_id, tmdb_id, trakt_id, media_type, title, original_title,
            year, overview, tagline, genres, keywords, cast, directors, writers,
            production_companies, production_countries, spoken_languages,
            runtime_minutes, rating, votes, popularity, original_language,
            release_date, status, adult, revenue, budget, homepage,
            obscurity_score, mainstream_score, freshness_score, active, updated_at,
            season_count, episode_count, episode_runtimes, first_air_date,
            last_air_date, in_production, created_by, networks
        FROM candidates
        WHERE active
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates = Vec::with_capacity(rows.len());
    for row in rows {
        let media_type_str: String = row.try_get("media_type")?;
        let media_type = MediaType::parse_loose(&media_type_str).unwrap_or(MediaType::Movie);
        let runtime_minutes: Option<i32> = row.try_get("runtime_minutes")?;
        let votes: i64 = row.try_get("votes")?;
        candidates.push(Candidate {
            candidate_id: row.try_get("candidate_id")?,
            tmdb_id: row.try_get("tmdb_id")?,
            trakt_id: row.try_get("trakt_id")?,
            media_type,
            title: row.try_get("title")?,
            original_title: row.try_get("original_title")?,
            year: row.try_get("year")?,
            overview: row.try_get("overview")?,
            tagline: row.try_get("tagline")?,
            genres: row.try_get("genres")?,
            keywords: row.try_get("keywords")?,
            cast: row.try_get("cast")?,
            directors: row.try_get("directors")?,
            writers: row.try_get("writers")?,
            production_companies: row.try_get("production_companies")?,
            production_countries: row.try_get("production_countries")?,
            spoken_languages: row.try_get("spoken_languages")?,
            runtime_minutes: runtime_minutes.map(|m| m.max(0) as u32),
            rating: row.try_get("rating")?,
            votes: votes.max(0) as u64,
            popularity: row.try_get("popularity")?,
            original_language: row.try_get("original_language")?,
            release_date: row.try_get::<Option<NaiveDate>, _>("release_date")?,
            status: row.try_get("status")?,
            adult: row.try_get("adult")?,
            revenue: row.try_get("revenue")?,
            budget: row.try_get("budget")?,
            homepage: row.try_get("homepage")?,
            tv: TvFields {
                season_count: row.try_get::<Option<i32>, _>("season_count")?.map(|v| v.max(0) as u32),
                episode_count: row.try_get::<Option<i32>, _>("episode_count")?.map(|v| v.max(0) as u32),
                episode_runtimes: row
                    .try_get::<Vec<i32>, _>("episode_runtimes")?
                    .into_iter()
                    .map(|v| v.max(0) as u32)
                    .collect(),
                first_air_date: row.try_get("first_air_date")?,
                last_air_date: row.try_get("last_air_date")?,
                in_production: row.try_get("in_production")?,
                created_by: row.try_get("created_by")?,
                networks: row.try_get("networks")?,
            },
            obscurity_score: row.try_get("obscurity_score")?,
            mainstream_score: row.try_get("mainstream_score")?,
            freshness_score: row.try_get("freshness_score")?,
            active: row.try_get("active")?,
            updated_at: row.try_get("updated_at")?,
        });
    }
    Ok(candidates)
}

struct PgListProvider {
    pool: sqlx::PgPool,
}

impl PgListProvider {
    fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListProvider for PgListProvider {
    async fn get_list_items(&self, list_id: Uuid) -> taste_engine::Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT candidate_id FROM list_items WHERE list_id = $1")
            .bind(list_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| taste_engine::EngineError::TransientExternal(e.to_string()))?;
        rows.into_iter()
            .map(|r| r.try_get::<Uuid, _>("candidate_id").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string())))
            .collect()
    }
}

/// Bridges the append-only `watch_history` log (keyed by `trakt_id`) to the
/// engine's candidate-id based collaborator contracts, using the catalog
/// snapshot loaded at boot to resolve `trakt_id -> candidate_id`.
struct PgWatchEventProvider {
    store: WatchHistoryStore,
    pool: sqlx::PgPool,
    trakt_index: std::collections::HashMap<i64, Candidate>,
}

impl PgWatchEventProvider {
    fn new(pool: sqlx::PgPool, catalog: Vec<Candidate>) -> Self {
        let trakt_index = catalog
            .into_iter()
            .filter_map(|c| c.trakt_id.map(|t| (t, c)))
            .collect();
        Self { store: WatchHistoryStore::new(pool.clone()), pool, trakt_index }
    }
}

#[async_trait]
impl WatchEventProvider for PgWatchEventProvider {
    async fn recent_events(&self, user_id: Uuid, limit: usize) -> taste_engine::Result<Vec<ProfileWatchEvent>> {
        let events = self
            .store
            .get_recent_watches(user_id, limit, None)
            .await
            .map_err(|e| taste_engine::EngineError::TransientExternal(e.to_string()))?;
        Ok(events
            .into_iter()
            .filter_map(|e| {
                self.trakt_index.get(&e.trakt_id).map(|c| ProfileWatchEvent {
                    candidate_id: c.candidate_id,
                    watched_at: e.watched_at,
                })
            })
            .collect())
    }

    async fn recent_phase_items(&self, user_id: Uuid, lookback_days: i64) -> taste_engine::Result<Vec<PhaseItem>> {
        let since: DateTime<Utc> = Utc::now() - chrono::Duration::days(lookback_days);
        let rows = sqlx::query(
            r#"
            SELECT trakt_id, media_type, watched_at, title, genres, keywords,
                   poster, runtime_minutes, language
            FROM watch_history
            WHERE user_id = $1 AND watched_at >= $2
            ORDER BY watched_at DESC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| taste_engine::EngineError::TransientExternal(e.to_string()))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let trakt_id: i64 = row.try_get("trakt_id").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?;
            let media_type_str: String = row.try_get("media_type").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?;
            let media_type = MediaType::parse_loose(&media_type_str).unwrap_or(MediaType::Movie);
            // TODO: pull the stored candidate embedding once the vector
            // index exposes a lookup by candidate id instead of position.
            let embedding = Vec::new();
            items.push(PhaseItem {
                trakt_id,
                tmdb_id: self.trakt_index.get(&trakt_id).map(|c| c.tmdb_id),
                title: row.try_get("title").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?,
                media_type,
                watched_at: row.try_get("watched_at").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?,
                collection_id: None,
                collection_name: None,
                genres: row.try_get("genres").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?,
                keywords: row.try_get("keywords").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?,
                poster: row.try_get("poster").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?,
                runtime_minutes: row.try_get("runtime_minutes").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?,
                language: row.try_get("language").map_err(|e| taste_engine::EngineError::DataIntegrity(e.to_string()))?,
                embedding,
            });
        }
        Ok(items)
    }
}
