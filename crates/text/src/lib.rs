//! C1 Text Processor: normalizes a free-text prompt and extracts tokens,
//! entities, phrases, seed titles, negative cues, and structured
//! constraints. Never fails on malformed input — every field is
//! best-effort and defaults to empty.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericConstraint {
    pub field: String,
    pub comparator: Comparator,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrompt {
    pub normalized: String,
    pub tokens: Vec<String>,
    pub lemmas: Vec<String>,
    pub entities: Vec<String>,
    pub phrases: Vec<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub numeric_constraints: Vec<NumericConstraint>,
    pub negative_cues: Vec<String>,
    pub seeds: Vec<String>,
    pub media_type: Option<String>,
    pub adult_excluded: bool,
}

fn stop_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" but | except | without | rather than | though ").unwrap())
}

fn year_single_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap())
}

fn year_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(19\d{2}|20\d{2})\s*(?:-|to)\s*(19\d{2}|20\d{2})").unwrap())
}

fn after_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:after|since)\s+(19\d{2}|20\d{2})").unwrap())
}

fn before_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"before\s+(19\d{2}|20\d{2})").unwrap())
}

fn like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:like|similar to)\s+(.+)$").unwrap())
}

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(rating|votes|revenue|budget|popularity|seasons|episodes|runtime)\s*(>=|<=|>|<|=)\s*(\d+(?:\.\d+)?)")
            .unwrap()
    })
}

fn quoted_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]{2,80})""#).unwrap())
}

/// Lowercase, collapse whitespace, strip punctuation except `.,!?`.
pub fn normalize(prompt: &str) -> String {
    let lowered = prompt.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?') {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
}

fn extract_years(normalized: &str) -> (Option<i32>, Option<i32>) {
    if let Some(caps) = year_range_re().captures(normalized) {
        let start: i32 = caps[1].parse().unwrap_or_default();
        let end: i32 = caps[2].parse().unwrap_or_default();
        return (Some(start), Some(end));
    }
    // "after <year>" is inclusive per the resolved open question.
    if let Some(caps) = after_re().captures(normalized) {
        let y: i32 = caps[1].parse().unwrap_or_default();
        return (Some(y), None);
    }
    if let Some(caps) = before_re().captures(normalized) {
        let y: i32 = caps[1].parse().unwrap_or_default();
        return (None, Some(y));
    }
    (None, None)
}

fn extract_seed_titles(normalized: &str) -> Vec<String> {
    let mut seeds = Vec::new();
    if let Some(caps) = like_re().captures(normalized) {
        let mut tail = caps[1].to_string();
        if let Some(m) = stop_token_re().find(&tail) {
            tail.truncate(m.start());
        }
        for part in tail.split([',']).flat_map(|s| s.split(" and ")) {
            let cleaned = part.trim();
            if !cleaned.is_empty() {
                seeds.push(cleaned.to_string());
            }
        }
    }
    seeds.truncate(5);
    seeds
}

fn extract_negative_cues(normalized: &str) -> Vec<String> {
    let mut phrases: Vec<String> = Vec::new();

    let patterns = [r"\bwithout\s+([^.,;]+)", r"\bno\s+([^.,;]+)", r"\bavoid\s+([^.,;]+)"];
    for pat in patterns {
        let re = Regex::new(pat).unwrap();
        if let Some(caps) = re.captures(normalized) {
            let mut tail = caps[1].to_string();
            if let Some(m) = stop_token_re().find(&tail) {
                tail.truncate(m.start());
            }
            for part in tail.split([','])
                .flat_map(|s| s.split(" and "))
                .flat_map(|s| s.split(" or "))
            {
                let cleaned = part.trim();
                if !cleaned.is_empty() {
                    phrases.push(cleaned.to_string());
                }
            }
        }
    }

    let not_re = Regex::new(r"\bnot\s+([a-z]{2,}(?:\s+[a-z]{2,}){0,2})").unwrap();
    for caps in not_re.captures_iter(normalized) {
        phrases.push(caps[1].trim().to_string());
    }

    let stopwords = ["too", "very", "really", "any", "the", "a", "an"];
    let mut cleaned: Vec<String> = Vec::new();
    for p in phrases {
        let words: Vec<&str> = p
            .split_whitespace()
            .filter(|w| !stopwords.contains(w))
            .collect();
        let joined = words.join(" ");
        if !joined.is_empty() && !cleaned.contains(&joined) {
            cleaned.push(joined);
        }
    }
    cleaned.truncate(8);
    cleaned
}

fn detect_media_type(normalized: &str) -> Option<String> {
    let show_re = Regex::new(r"\b(tv\s*show|tv\s*series|series|shows?)\b").unwrap();
    let movie_re = Regex::new(r"\b(movies?|films?)\b").unwrap();
    if show_re.is_match(normalized) {
        Some("show".to_string())
    } else if movie_re.is_match(normalized) {
        Some("movie".to_string())
    } else {
        None
    }
}

fn extract_numeric_constraints(normalized: &str) -> Vec<NumericConstraint> {
    numeric_re()
        .captures_iter(normalized)
        .filter_map(|caps| {
            let comparator = match &caps[2] {
                ">=" => Comparator::Gte,
                "<=" => Comparator::Lte,
                ">" => Comparator::Gt,
                "<" => Comparator::Lt,
                "=" => Comparator::Eq,
                _ => return None,
            };
            let threshold: f64 = caps[3].parse().ok()?;
            Some(NumericConstraint {
                field: caps[1].to_string(),
                comparator,
                threshold,
            })
        })
        .collect()
}

fn extract_entities(normalized: &str) -> Vec<String> {
    // Capitalized-run heuristic over the *original* casing is unavailable
    // post-normalization; approximate named entities as quoted phrases and
    // multi-word capitalized-looking tokens are out of reach without NER,
    // so fall back to the quoted-phrase extraction plus any seed titles
    // (which frequently are proper nouns in practice).
    quoted_phrase_re()
        .captures_iter(normalized)
        .map(|c| c[1].to_string())
        .collect()
}

/// A naive suffix-stripping lemmatizer: good enough for genre/keyword
/// matching without pulling in a full NLP stack.
fn lemmatize(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| {
            if let Some(stem) = t.strip_suffix("ies") {
                format!("{stem}y")
            } else if let Some(stem) = t.strip_suffix("es") {
                stem.to_string()
            } else if t.len() > 3 {
                t.strip_suffix('s').unwrap_or(t).to_string()
            } else {
                t.clone()
            }
        })
        .collect()
}

pub fn parse(prompt: &str) -> ParsedPrompt {
    let normalized = normalize(prompt);
    if normalized.is_empty() {
        return ParsedPrompt::default();
    }

    let tokens: Vec<String> = normalized
        .split_whitespace()
        .map(|s| s.trim_matches(|c: char| matches!(c, '.' | ',' | '!' | '?')).to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let lemmas = lemmatize(&tokens);
    let (year_from, year_to) = extract_years(&normalized);
    let seeds = extract_seed_titles(&normalized);
    let negative_cues = extract_negative_cues(&normalized);
    let media_type = detect_media_type(&normalized);
    let numeric_constraints = extract_numeric_constraints(&normalized);
    let phrases = extract_entities(&normalized);
    let adult_excluded = normalized.contains("no adult") || normalized.contains("not adult");

    ParsedPrompt {
        normalized,
        tokens,
        lemmas,
        entities: phrases.clone(),
        phrases,
        year_from,
        year_to,
        numeric_constraints,
        negative_cues,
        seeds,
        media_type,
        adult_excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prompt_returns_empty_structures() {
        let parsed = parse("");
        assert_eq!(parsed, ParsedPrompt::default());
    }

    #[test]
    fn normalize_lowercases_collapses_whitespace_and_strips_punctuation() {
        assert_eq!(normalize("  Hello---World!!  "), "hello world!");
    }

    #[test]
    fn after_year_is_inclusive() {
        let parsed = parse("romantic comedies after 2015 in spanish");
        assert_eq!(parsed.year_from, Some(2015));
        assert_eq!(parsed.year_to, None);
    }

    #[test]
    fn seed_titles_stop_at_qualifier() {
        let parsed = parse("like inception but more cozy");
        assert_eq!(parsed.seeds, vec!["inception".to_string()]);
    }

    #[test]
    fn negative_cues_detect_without_no_avoid_not() {
        let parsed = parse("no horror, avoid slasher, not violent, without gore");
        assert!(parsed.negative_cues.iter().any(|c| c.contains("horror")));
        assert!(parsed.negative_cues.iter().any(|c| c.contains("slasher")));
        assert!(parsed.negative_cues.iter().any(|c| c.contains("violent")));
        assert!(parsed.negative_cues.iter().any(|c| c.contains("gore")));
    }

    #[test]
    fn media_type_prefers_show_over_movie_when_both_present() {
        let parsed = parse("movie night but really a tv series marathon");
        assert_eq!(parsed.media_type, Some("show".to_string()));
    }

    #[test]
    fn numeric_constraint_parses_comparator_and_threshold() {
        let parsed = parse("rating >= 7.5 please");
        assert_eq!(parsed.numeric_constraints.len(), 1);
        assert_eq!(parsed.numeric_constraints[0].field, "rating");
        assert_eq!(parsed.numeric_constraints[0].comparator, Comparator::Gte);
        assert!((parsed.numeric_constraints[0].threshold - 7.5).abs() < 1e-9);
    }
}
