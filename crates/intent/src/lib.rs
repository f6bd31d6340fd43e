//! C2 Intent Extractor: rule-based extraction always runs; an LLM call is
//! attempted on top of it with a strict JSON-only prompt, falling back to
//! the rule-based result on any failure. Results are cached for 6 hours
//! keyed by a SHA-256 digest of the semantic inputs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taste_cache::{ttl, TasteCache};
use taste_llm::{extract_json, LlmClient};
use tracing::{debug, instrument, warn};

const SCHEMA_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopularityPref {
    Mainstream,
    Obscure,
    Indie,
    Blockbuster,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Mindbending,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub genres: Vec<String>,
    pub required_genres: Vec<String>,
    pub exclude_genres: Vec<String>,
    pub moods: Vec<String>,
    pub tones: Vec<String>,
    pub actors: Vec<String>,
    pub directors: Vec<String>,
    pub studios: Vec<String>,
    pub runtime_min: Option<u32>,
    pub runtime_max: Option<u32>,
    pub era: Option<String>,
    pub popularity_pref: Option<PopularityPref>,
    pub complexity: Option<Complexity>,
    pub pacing: Option<String>,
    pub target_size: u32,
    pub negative_cues: Vec<String>,
    pub query_variants: Vec<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub languages: Vec<String>,
    pub media_type: Option<String>,
    pub seeds: Vec<String>,
}

impl Intent {
    pub fn rule_based(parsed: &taste_text::ParsedPrompt) -> Self {
        let mut genres = Vec::new();
        let mut required_genres = Vec::new();
        let wants_strict = parsed.normalized.contains("must be") || parsed.normalized.contains("only");

        for (keyword, genre) in GENRE_KEYWORDS {
            if parsed.normalized.contains(keyword) {
                if wants_strict {
                    required_genres.push(genre.to_string());
                } else {
                    genres.push(genre.to_string());
                }
            }
        }

        let mut languages = Vec::new();
        for (keyword, code) in LANGUAGE_KEYWORDS {
            if parsed.normalized.contains(keyword) {
                languages.push(code.to_string());
            }
        }

        let moods: Vec<String> = MOOD_KEYWORDS
            .iter()
            .filter(|(kw, _)| parsed.normalized.contains(*kw))
            .map(|(_, mood)| mood.to_string())
            .collect();

        let tones: Vec<String> = TONE_KEYWORDS
            .iter()
            .filter(|kw| parsed.normalized.contains(*kw))
            .map(|kw| kw.to_string())
            .collect();

        let query_variants = build_query_variants(&parsed.normalized, &genres);

        Self {
            genres,
            required_genres,
            exclude_genres: Vec::new(),
            moods,
            tones,
            actors: Vec::new(),
            directors: Vec::new(),
            studios: Vec::new(),
            runtime_min: None,
            runtime_max: None,
            era: None,
            popularity_pref: None,
            complexity: None,
            pacing: None,
            target_size: 30,
            negative_cues: parsed.negative_cues.clone(),
            query_variants,
            year_from: parsed.year_from,
            year_to: parsed.year_to,
            languages,
            media_type: parsed.media_type.clone(),
            seeds: parsed.seeds.clone(),
        }
    }
}

const GENRE_KEYWORDS: &[(&str, &str)] = &[
    ("romantic comed", "Romance"),
    ("rom-com", "Romance"),
    ("romance", "Romance"),
    ("comed", "Comedy"),
    ("horror", "Horror"),
    ("sci-fi", "Sci-Fi"),
    ("science fiction", "Sci-Fi"),
    ("thriller", "Thriller"),
    ("drama", "Drama"),
    ("action", "Action"),
    ("documentary", "Documentary"),
    ("animat", "Animation"),
    ("fantasy", "Fantasy"),
    ("mystery", "Mystery"),
    ("crime", "Crime"),
];

const LANGUAGE_KEYWORDS: &[(&str, &str)] = &[
    ("spanish", "es"),
    ("french", "fr"),
    ("korean", "ko"),
    ("japanese", "ja"),
    ("german", "de"),
    ("italian", "it"),
    ("english", "en"),
];

const MOOD_KEYWORDS: &[(&str, &str)] = &[
    ("cozy", "cozy"),
    ("wholesome", "wholesome"),
    ("dark", "dark"),
    ("feel-good", "feel_good"),
    ("tense", "tense"),
    ("uplifting", "uplifting"),
];

const TONE_KEYWORDS: &[&str] = &["light", "cozy", "wholesome", "warm"];

fn build_query_variants(normalized: &str, genres: &[String]) -> Vec<String> {
    if normalized.is_empty() {
        return Vec::new();
    }
    let mut variants = vec![normalized.to_string()];
    if !genres.is_empty() {
        variants.push(format!("{} {}", genres.join(" "), normalized));
    }
    variants.push(format!("{normalized} recommendations"));
    variants.truncate(5);
    variants
}

#[derive(Debug, Deserialize)]
struct LlmIntentResponse {
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    exclude_genres: Vec<String>,
    #[serde(default)]
    moods: Vec<String>,
    #[serde(default)]
    actors: Vec<String>,
    #[serde(default)]
    directors: Vec<String>,
    #[serde(default)]
    studios: Vec<String>,
    #[serde(default)]
    query_variants: Vec<String>,
}

const INTENT_SYSTEM_PROMPT: &str = "You extract structured viewing intent from a user prompt. \
Respond with JSON only, no prose, matching: \
{\"genres\":[],\"exclude_genres\":[],\"moods\":[],\"actors\":[],\"directors\":[],\"studios\":[],\"query_variants\":[]}. \
Never infer actors or directors from referenced titles; only list ones explicitly named.";

pub struct IntentExtractor {
    cache: Option<Arc<TasteCache>>,
    llm: LlmClient,
}

impl IntentExtractor {
    pub fn new(cache: Option<Arc<TasteCache>>, llm: LlmClient) -> Self {
        Self { cache, llm }
    }

    #[instrument(skip(self, prompt, persona_text, history_summary))]
    pub async fn extract(
        &self,
        prompt: &str,
        persona_text: &str,
        history_summary: &str,
    ) -> Intent {
        let key = cache_key(prompt, persona_text, history_summary);

        if let Some(cache) = &self.cache {
            if let Ok(Some(cached)) = cache.get::<Intent>(&key).await {
                debug!("intent cache hit");
                return cached;
            }
        }

        let parsed = taste_text::parse(prompt);
        let rule_based = Intent::rule_based(&parsed);

        let intent = match self.try_llm_refine(prompt, persona_text, &rule_based).await {
            Some(refined) => refined,
            None => rule_based,
        };

        if let Some(cache) = &self.cache {
            let _ = cache.set(&key, &intent, ttl::INTENT_SECONDS).await;
        }

        intent
    }

    async fn try_llm_refine(&self, prompt: &str, persona_text: &str, base: &Intent) -> Option<Intent> {
        if !self.llm.is_configured() {
            return None;
        }
        let user_prompt = format!("Prompt: {prompt}\nPersona: {persona_text}");
        let response = self
            .llm
            .complete(
                INTENT_SYSTEM_PROMPT,
                &user_prompt,
                0.1,
                400,
                std::time::Duration::from_secs(60),
            )
            .await
            .map_err(|e| warn!(error = %e, "intent llm call failed, using rule-based result"))
            .ok()?;

        let parsed: LlmIntentResponse = extract_json(&response)
            .map_err(|e| warn!(error = %e, "intent llm response invalid json, using rule-based result"))
            .ok()?;

        let mut merged = base.clone();
        if !parsed.genres.is_empty() {
            merged.genres = parsed.genres;
        }
        merged.exclude_genres = parsed.exclude_genres;
        if !parsed.moods.is_empty() {
            merged.moods = parsed.moods;
        }
        merged.actors = parsed.actors;
        merged.directors = parsed.directors;
        merged.studios = parsed.studios;
        if !parsed.query_variants.is_empty() {
            merged.query_variants = parsed.query_variants;
        }
        Some(merged)
    }
}

fn cache_key(prompt: &str, persona_text: &str, history_summary: &str) -> String {
    let truncated_persona: String = persona_text.chars().take(500).collect();
    let truncated_history: String = history_summary.chars().take(500).collect();
    taste_core::hashing::cache_key(
        "intent",
        &[prompt, &truncated_persona, &truncated_history, SCHEMA_VERSION],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_genres_only_populated_on_explicit_must_be_or_only() {
        let parsed = taste_text::parse("comedies only please");
        let intent = Intent::rule_based(&parsed);
        assert!(intent.required_genres.contains(&"Comedy".to_string()));
        assert!(intent.genres.is_empty());
    }

    #[test]
    fn optional_genres_populated_without_strict_language() {
        let parsed = taste_text::parse("some romantic comedies please");
        let intent = Intent::rule_based(&parsed);
        assert!(intent.genres.contains(&"Romance".to_string()));
        assert!(intent.required_genres.is_empty());
    }

    #[test]
    fn s1_spanish_romcoms_after_2015() {
        let parsed = taste_text::parse("romantic comedies after 2015 in spanish");
        let intent = Intent::rule_based(&parsed);
        assert!(intent.genres.contains(&"Romance".to_string()));
        assert!(intent.genres.contains(&"Comedy".to_string()));
        assert_eq!(intent.year_from, Some(2015));
        assert_eq!(intent.languages, vec!["es".to_string()]);
    }

    #[tokio::test]
    async fn extract_without_llm_configured_falls_back_to_rules() {
        let extractor = IntentExtractor::new(None, taste_llm::LlmClient::new(None));
        let intent = extractor.extract("some horror movies", "", "").await;
        assert!(intent.genres.contains(&"Horror".to_string()));
    }

    #[test]
    fn empty_prompt_yields_empty_intent_fields() {
        let parsed = taste_text::parse("");
        let intent = Intent::rule_based(&parsed);
        assert!(intent.genres.is_empty());
        assert!(intent.query_variants.is_empty());
    }
}
