//! C9 LLM Judge: optional absolute rescoring over fixed-size batches,
//! grounded on the batched-prompt/JSON-extraction shape of the original
//! judge implementation, rebuilt on top of the shared chat client.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use taste_catalog::Candidate;
use taste_llm::LlmClient;
use tracing::{instrument, warn};
use uuid::Uuid;

const BATCH_SIZE: usize = 5;
const TIMEOUT: Duration = Duration::from_secs(90);
const RUBRIC: [(&str, f32); 6] = [
    ("on_topic_fit", 0.45),
    ("mood_season_fit", 0.25),
    ("genre_language_runtime", 0.10),
    ("quality_signal", 0.10),
    ("constraints", 0.05),
    ("user_profile_fit", 0.05),
];
const THRESHOLD_HINT: f32 = 0.70;

const SYSTEM_PROMPT: &str = "You are a rigorous ranking judge. Respond with strict JSON only.";

#[derive(Debug, Clone, Default)]
pub struct QuerySummary {
    pub prompt_summary: String,
    pub target_size: u32,
    pub negative_cues: Vec<String>,
    pub query_variants: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct JudgeItem {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub media_type: String,
    pub genres: Vec<String>,
    pub keywords: Vec<String>,
    pub overview: String,
    pub people: Vec<String>,
    pub studio: Option<String>,
    pub network: Option<String>,
    pub rating: f32,
    pub votes: u64,
    pub popularity: f32,
    pub language: Option<String>,
    pub runtime: Option<u32>,
}

impl JudgeItem {
    pub fn from_candidate(c: &Candidate) -> Self {
        let mut people: Vec<String> = c.cast.iter().take(2).cloned().collect();
        people.extend(c.directors.iter().take(2).cloned());
        Self {
            id: c.candidate_id,
            title: c.title.chars().take(120).collect(),
            year: c.year_or_from_date(),
            media_type: c.media_type.as_str().to_string(),
            genres: c.genres.iter().take(6).cloned().collect(),
            keywords: c.keywords.iter().take(8).cloned().collect(),
            overview: c.overview.chars().take(180).collect(),
            people,
            studio: c.production_companies.first().cloned(),
            network: c.tv.networks.first().cloned(),
            rating: c.rating,
            votes: c.votes,
            popularity: c.popularity,
            language: Some(c.original_language.clone()),
            runtime: c.runtime_minutes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JudgeResult {
    pub scores: HashMap<Uuid, f32>,
    pub reasons: HashMap<Uuid, Vec<String>>,
}

#[derive(Deserialize)]
struct ScoresResponse {
    scores: Vec<ScoreEntry>,
}

#[derive(Deserialize)]
struct ScoreEntry {
    id: i64,
    score: f32,
    #[serde(default)]
    reasons: Vec<String>,
}

pub struct LlmJudge {
    llm: LlmClient,
}

impl LlmJudge {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Scores candidates fresh every call; never caches results, since
    /// stale scores across different queries would be worse than no
    /// judge at all. Per-batch failures yield empty scores for that
    /// batch without failing the whole call.
    #[instrument(skip(self, candidates, persona, history))]
    pub async fn judge(&self, query_summary: &QuerySummary, candidates: &[JudgeItem], persona: &str, history: &str) -> JudgeResult {
        if !self.llm.is_configured() {
            return JudgeResult::default();
        }

        let mut result = JudgeResult::default();
        for batch in candidates.chunks(BATCH_SIZE) {
            let prompt = build_prompt(query_summary, batch, persona, history);
            match self.llm.complete(SYSTEM_PROMPT, &prompt, 0.0, 300, TIMEOUT).await {
                Ok(text) => apply_batch_response(&text, batch, &mut result),
                Err(e) => {
                    warn!(error = %e, "judge batch call failed, skipping batch");
                }
            }
        }
        result
    }
}

fn build_prompt(query_summary: &QuerySummary, batch: &[JudgeItem], persona: &str, history: &str) -> String {
    let rubric = serde_json::json!({
        "dimensions": RUBRIC.iter().map(|(name, weight)| serde_json::json!({"name": name, "weight": weight})).collect::<Vec<_>>(),
        "calibration": {
            "target_size": query_summary.target_size,
            "threshold_hint": THRESHOLD_HINT,
            "neutral_default": 0.50,
        },
    });

    let items: Vec<serde_json::Value> = batch
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            serde_json::json!({
                "id": idx,
                "title": item.title,
                "year": item.year,
                "media_type": item.media_type,
                "genres": item.genres,
                "keywords": item.keywords,
                "overview": item.overview,
                "people": item.people,
                "studio": item.studio,
                "network": item.network,
                "rating": item.rating,
                "votes": item.votes,
                "popularity": item.popularity,
                "language": item.language,
                "runtime": item.runtime,
            })
        })
        .collect();

    let payload = serde_json::json!({
        "criteria": {
            "prompt_summary": query_summary.prompt_summary,
            "negative_cues": query_summary.negative_cues,
            "query_variants": query_summary.query_variants,
        },
        "rubric": rubric,
        "user_context": {"persona": truncate(persona, 200), "history": truncate(history, 150)},
        "items": items,
        "output": {
            "schema": {"scores": [{"id": "int", "score": "float(0..1)", "reasons": ["str", "str"]}]},
            "rules": ["Only score provided item ids", "No prose outside JSON", "Reasons <=8 words, max 2 per item"],
        },
    });

    format!(
        "You are a strict list curator. Score each item on an absolute 0.0-1.0 scale. \
Use an absolute scale across batches (do not rescale within this batch). \
Return ONLY valid JSON matching the schema below.\n{}",
        payload
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn apply_batch_response(text: &str, batch: &[JudgeItem], result: &mut JudgeResult) {
    let parsed: Option<ScoresResponse> = taste_llm::extract_json(text).ok();
    let Some(parsed) = parsed else {
        warn!("judge batch produced no parseable JSON");
        return;
    };
    for entry in parsed.scores {
        let Ok(idx) = usize::try_from(entry.id) else {
            continue;
        };
        let Some(item) = batch.get(idx) else {
            continue;
        };
        if !(0.0..=1.0).contains(&entry.score) {
            continue;
        }
        result.scores.insert(item.id, entry.score);
        let mut reasons = entry.reasons;
        reasons.truncate(2);
        if !reasons.is_empty() {
            result.reasons.insert(item.id, reasons);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item(id: Uuid) -> JudgeItem {
        JudgeItem {
            id,
            title: "Test".into(),
            year: Some(2020),
            media_type: "movie".into(),
            genres: vec!["comedy".into()],
            keywords: vec![],
            overview: "a film".into(),
            people: vec![],
            studio: None,
            network: None,
            rating: 7.0,
            votes: 100,
            popularity: 40.0,
            language: Some("en".into()),
            runtime: Some(100),
        }
    }

    #[tokio::test]
    async fn unconfigured_llm_returns_empty_result() {
        let judge = LlmJudge::new(LlmClient::new(None));
        let summary = QuerySummary::default();
        let items = vec![sample_item(Uuid::new_v4())];
        let result = judge.judge(&summary, &items, "", "").await;
        assert!(result.scores.is_empty());
    }

    #[test]
    fn apply_batch_response_discards_out_of_range_scores() {
        let item = sample_item(Uuid::new_v4());
        let batch = vec![item.clone()];
        let mut result = JudgeResult::default();
        let text = r#"{"scores":[{"id":0,"score":1.5,"reasons":["too high"]}]}"#;
        apply_batch_response(text, &batch, &mut result);
        assert!(result.scores.is_empty());
    }

    #[test]
    fn apply_batch_response_accepts_valid_score_and_truncates_reasons() {
        let item = sample_item(Uuid::new_v4());
        let batch = vec![item.clone()];
        let mut result = JudgeResult::default();
        let text = r#"prose before {"scores":[{"id":0,"score":0.82,"reasons":["a","b","c"]}]} prose after"#;
        apply_batch_response(text, &batch, &mut result);
        assert_eq!(result.scores.get(&item.id), Some(&0.82));
        assert_eq!(result.reasons.get(&item.id).unwrap().len(), 2);
    }
}
