//! C10 Pairwise Ranker: an LLM-judged comparison tournament over the
//! engine's top-scored candidates, grounded on the weighted-sampling
//! tournament scheduler used for pairwise reranking elsewhere in the
//! corpus, rebuilt on top of the shared chat client and array-extraction
//! helper.

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use taste_catalog::{Candidate, MediaType};
use taste_llm::LlmClient;
use tracing::{instrument, warn};
use uuid::Uuid;

const HARD_CAP: usize = 60;
const TIMEOUT: Duration = Duration::from_secs(60);
const ITEM_OVERVIEW_LEN: usize = 160;

const SYSTEM_PROMPT: &str = "You are a strict comparator. Given a pair of candidates, decide which is the better recommendation for the stated intent and persona. Return ONLY a JSON array.";

#[derive(Debug, Clone)]
pub struct PairwiseItem {
    pub id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
    pub genres: Vec<String>,
    pub keywords: Vec<String>,
    pub overview: String,
    pub tagline: String,
    pub cast: Vec<String>,
    pub studio: Option<String>,
    pub network: Option<String>,
    pub rating: f32,
    pub votes: u64,
    pub popularity: f32,
    pub language: String,
    pub runtime: Option<u32>,
    pub status: String,
    pub season_count: Option<u32>,
    pub episode_count: Option<u32>,
    pub obscurity_score: f32,
    pub final_score: f32,
}

impl PairwiseItem {
    pub fn from_candidate(c: &Candidate, final_score: f32) -> Self {
        Self {
            id: c.candidate_id,
            title: c.title.clone(),
            year: c.year_or_from_date(),
            media_type: c.media_type,
            genres: c.genres.iter().take(6).cloned().collect(),
            keywords: c.keywords.iter().take(8).cloned().collect(),
            overview: c.overview.clone(),
            tagline: c.tagline.clone(),
            cast: c.cast.iter().take(4).cloned().collect(),
            studio: c.production_companies.first().cloned(),
            network: c.tv.networks.first().cloned(),
            rating: c.rating,
            votes: c.votes,
            popularity: c.popularity,
            language: c.original_language.clone(),
            runtime: c.runtime_minutes,
            status: c.status.clone(),
            season_count: c.tv.season_count,
            episode_count: c.tv.episode_count,
            obscurity_score: c.obscurity_score,
            final_score,
        }
    }

    /// Compact pipe-separated summary used inside the comparator prompt.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        match self.year {
            Some(y) => parts.push(format!("{} ({y})", self.title)),
            None => parts.push(self.title.clone()),
        }
        parts.push(format!("[{}]", self.media_type.as_str()));
        if !self.genres.is_empty() {
            parts.push(format!("Genres: {}", self.genres.join("/")));
        }
        if !self.keywords.is_empty() {
            parts.push(format!("Keywords: {}", self.keywords.join(", ")));
        }
        if !self.overview.is_empty() {
            let overview: String = self.overview.chars().take(ITEM_OVERVIEW_LEN).collect();
            parts.push(format!("Plot: {overview}"));
        }
        if !self.tagline.is_empty() {
            let tagline: String = self.tagline.chars().take(120).collect();
            parts.push(format!("Tagline: {tagline}"));
        }
        if !self.cast.is_empty() {
            parts.push(format!("Cast: {}", self.cast.join(", ")));
        }
        if let Some(studio) = &self.studio {
            parts.push(format!("Studio: {studio}"));
        }
        if let Some(network) = &self.network {
            parts.push(format!("Network: {network}"));
        }
        parts.push(format!("Rating: {:.1}/10", self.rating));
        parts.push(format!("Votes: {}", self.votes));
        parts.push(format!("Pop: {:.1}", self.popularity));
        parts.push(format!("Lang: {}", self.language));
        if let Some(runtime) = self.runtime {
            parts.push(format!("Runtime: {runtime}min"));
        }
        if self.status != "Released" && self.status != "Ended" && !self.status.is_empty() {
            parts.push(format!("Status: {}", self.status));
        }
        if matches!(self.media_type, MediaType::Show) {
            if let Some(seasons) = self.season_count {
                parts.push(format!("Seasons: {seasons}"));
            }
            if let Some(episodes) = self.episode_count {
                parts.push(format!("Episodes: {episodes}"));
            }
        }
        parts.push(format!("Obscurity: {:.2}", self.obscurity_score));
        parts.join(" | ")
    }
}

#[derive(Debug, Deserialize)]
struct PairResult {
    left_id: usize,
    right_id: usize,
    winner: String,
}

pub struct PairwiseRanker {
    llm: LlmClient,
}

#[derive(Debug, Clone, Default)]
pub struct RankOutcome {
    pub order: Vec<usize>,
    pub pairs_used: usize,
}

impl PairwiseRanker {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Runs the tournament and returns `items` indices ordered best-first.
    /// Items outside the top-K tournament pool keep their incoming
    /// (engine) order appended after the judged ones.
    #[instrument(skip(self, items, intent, persona, history))]
    pub async fn rank(&self, items: &[PairwiseItem], intent: &str, persona: &str, history: &str, max_pairs: usize, batch_size: usize) -> RankOutcome {
        let n = items.len();
        if n <= 1 {
            return RankOutcome {
                order: (0..n).collect(),
                pairs_used: 0,
            };
        }

        if !self.llm.is_configured() {
            return RankOutcome {
                order: (0..n).collect(),
                pairs_used: 0,
            };
        }

        let k = max_n_for_pairs(max_pairs).min(n).min(HARD_CAP);
        let mut top_k: Vec<usize> = (0..n).collect();
        top_k.sort_by(|&a, &b| items[b].final_score.partial_cmp(&items[a].final_score).unwrap_or(std::cmp::Ordering::Equal));
        top_k.truncate(k);
        let top_k_set: HashSet<usize> = top_k.iter().copied().collect();

        let pairs = sample_pairs_weighted(&top_k, items, max_pairs);

        let mut wins: HashMap<usize, f32> = top_k.iter().map(|&i| (i, 0.0)).collect();
        let mut played: HashMap<usize, u32> = top_k.iter().map(|&i| (i, 0)).collect();
        let mut pairs_used = 0usize;

        for batch in pairs.chunks(batch_size) {
            if pairs_used >= max_pairs {
                break;
            }
            let prompt = build_prompt(batch, items, intent, persona, history);
            let results = match self.llm.complete(SYSTEM_PROMPT, &prompt, 0.0, 512, TIMEOUT).await {
                Ok(text) => taste_llm::extract_json_array::<PairResult>(&text).unwrap_or_default(),
                Err(e) => {
                    warn!(error = %e, "pairwise batch call failed, skipping batch");
                    Vec::new()
                }
            };

            for result in results {
                if pairs_used >= max_pairs {
                    break;
                }
                if result.left_id >= items.len() || result.right_id >= items.len() {
                    continue;
                }
                *played.entry(result.left_id).or_insert(0) += 1;
                *played.entry(result.right_id).or_insert(0) += 1;
                match result.winner.as_str() {
                    "left" => *wins.entry(result.left_id).or_insert(0.0) += 1.0,
                    "right" => *wins.entry(result.right_id).or_insert(0.0) += 1.0,
                    "tie" => {
                        *wins.entry(result.left_id).or_insert(0.0) += 0.5;
                        *wins.entry(result.right_id).or_insert(0.0) += 0.5;
                    }
                    _ => {}
                }
                pairs_used += 1;
            }
        }

        let win_rate = |idx: usize| -> f32 {
            let p = played.get(&idx).copied().unwrap_or(0);
            if p == 0 {
                0.5
            } else {
                wins.get(&idx).copied().unwrap_or(0.0) / p as f32
            }
        };

        let mut top_k_sorted = top_k.clone();
        top_k_sorted.sort_by(|&a, &b| win_rate(b).partial_cmp(&win_rate(a)).unwrap_or(std::cmp::Ordering::Equal));

        let remaining: Vec<usize> = (0..n).filter(|i| !top_k_set.contains(i)).collect();
        top_k_sorted.extend(remaining);

        RankOutcome {
            order: top_k_sorted,
            pairs_used,
        }
    }
}

/// Largest N such that N*(N-1)/2 <= budget_pairs, capped at `HARD_CAP`.
fn max_n_for_pairs(budget_pairs: usize) -> usize {
    if budget_pairs <= 1 {
        return 2;
    }
    let n = ((1.0 + (1.0 + 8.0 * budget_pairs as f64).sqrt()) / 2.0) as usize;
    n.clamp(2, HARD_CAP)
}

fn sample_pairs_weighted(indices: &[usize], items: &[PairwiseItem], max_pairs: usize) -> Vec<(usize, usize)> {
    let k = indices.len();
    if k <= 1 {
        return Vec::new();
    }

    let weights: Vec<f32> = indices.iter().map(|&i| items[i].final_score + 0.1).collect();
    let dist = match WeightedIndex::new(&weights) {
        Ok(d) => d,
        Err(_) => return Vec::new(),
    };

    let mut rng = rand::thread_rng();
    let target_pairs = max_pairs.min(k * 8);
    let mut pairs = Vec::new();
    let mut seen = HashSet::new();
    let mut attempts = 0usize;
    let max_attempts = target_pairs * 3;

    while pairs.len() < target_pairs && attempts < max_attempts {
        let a = indices[dist.sample(&mut rng)];
        let b = indices[dist.sample(&mut rng)];
        attempts += 1;
        if a == b {
            continue;
        }
        let pair = if a < b { (a, b) } else { (b, a) };
        if seen.insert(pair) {
            pairs.push(pair);
        }
    }

    pairs.truncate(max_pairs);
    pairs
}

fn build_prompt(pairs: &[(usize, usize)], items: &[PairwiseItem], intent: &str, persona: &str, history: &str) -> String {
    let mut pairs_text = String::new();
    for (n, (left, right)) in pairs.iter().enumerate() {
        pairs_text.push_str(&format!("{}) left: {{id:{left}, {}}}\n", n + 1, items[*left].summary()));
        pairs_text.push_str(&format!("   right: {{id:{right}, {}}}\n", items[*right].summary()));
    }

    let intent: String = intent.chars().take(200).collect();
    let persona: String = persona.chars().take(300).collect();
    let history: String = history.chars().take(150).collect();

    format!(
        "Intent: {intent}\nPersona: {persona}\nHistory: {history}\n\nPairs:\n{pairs_text}\n\
Constraints:\n- winner must be exactly \"left\", \"right\", or \"tie\"\n- Return ONLY a JSON array like \
[{{\"left_id\":0,\"right_id\":1,\"winner\":\"left\",\"reason\":\"short\"}}]\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(final_score: f32) -> PairwiseItem {
        PairwiseItem {
            id: Uuid::new_v4(),
            title: "Test".into(),
            year: Some(2020),
            media_type: MediaType::Movie,
            genres: vec![],
            keywords: vec![],
            overview: String::new(),
            tagline: String::new(),
            cast: vec![],
            studio: None,
            network: None,
            rating: 7.0,
            votes: 10,
            popularity: 20.0,
            language: "en".into(),
            runtime: None,
            status: "Released".into(),
            season_count: None,
            episode_count: None,
            obscurity_score: 0.5,
            final_score,
        }
    }

    #[test]
    fn max_n_for_pairs_respects_hard_cap() {
        assert_eq!(max_n_for_pairs(100_000), HARD_CAP);
        assert_eq!(max_n_for_pairs(0), 2);
    }

    #[test]
    fn sample_pairs_weighted_never_pairs_an_item_with_itself() {
        let items: Vec<PairwiseItem> = (0..5).map(|i| item(i as f32 * 0.1)).collect();
        let indices: Vec<usize> = (0..items.len()).collect();
        let pairs = sample_pairs_weighted(&indices, &items, 20);
        assert!(pairs.iter().all(|(a, b)| a != b));
    }

    #[tokio::test]
    async fn rank_with_single_item_returns_trivial_order() {
        let ranker = PairwiseRanker::new(LlmClient::new(None));
        let items = vec![item(0.9)];
        let outcome = ranker.rank(&items, "intent", "", "", 60, 12).await;
        assert_eq!(outcome.order, vec![0]);
        assert_eq!(outcome.pairs_used, 0);
    }

    #[tokio::test]
    async fn rank_without_configured_llm_falls_back_to_engine_order() {
        let ranker = PairwiseRanker::new(LlmClient::new(None));
        let items: Vec<PairwiseItem> = (0..4).map(|i| item(i as f32 * 0.1)).collect();
        let outcome = ranker.rank(&items, "intent", "", "", 60, 12).await;
        assert_eq!(outcome.order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn summary_includes_media_type_and_rating() {
        let _ = Utc::now();
        let i = item(0.5);
        let s = i.summary();
        assert!(s.contains("[movie]"));
        assert!(s.contains("Rating: 7.0/10"));
    }
}
