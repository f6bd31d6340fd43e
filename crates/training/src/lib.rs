//! C13 Pairwise Trainer: session lifecycle, judgment intake, and the
//! immediate preference-vector update, grounded on the round-robin
//! scheduler and α-weighted vector-arithmetic update of the original
//! pairwise training service, rebuilt as pure functions over an
//! in-memory session (persistence is the caller's concern, same as the
//! rest of this workspace's session-shaped components).

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use taste_catalog::Candidate;
use taste_llm::LlmClient;
use tracing::instrument;
use uuid::Uuid;

const ALPHA: f32 = 0.08;
const BOOST: f32 = 0.1;
const BOTH_ALPHA_FACTOR: f32 = 0.6;
const NEITHER_ALPHA_FACTOR: f32 = 0.4;
const MAX_MICRO_UPDATES: usize = 10;
const MIN_JUDGMENTS_FOR_DELTA: usize = 5;
const TOP_PREFERRED_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    A,
    B,
    Skip,
    Both,
    Neither,
}

#[derive(Debug, Clone)]
pub struct PairwiseSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub prompt: String,
    pub list_type: String,
    pub candidate_pool: Vec<Uuid>,
    pub total_pairs: u32,
    pub completed_pairs: u32,
    pub status: SessionStatus,
    pub judged_pairs: HashSet<(Uuid, Uuid)>,
    pub winner_tally: HashMap<Uuid, u32>,
    pub judgment_count: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Chooses `total_pairs` from the pool size: 20 for pools of >=15, 15 for
/// >=10, else at least 10 (or the whole pool if smaller).
pub fn create_session(user_id: Uuid, prompt: String, candidate_pool: Vec<Uuid>, list_type: String, now: DateTime<Utc>) -> PairwiseSession {
    let total_pairs = if candidate_pool.len() >= 15 {
        20
    } else if candidate_pool.len() >= 10 {
        15
    } else {
        10.max(candidate_pool.len() as u32)
    };

    PairwiseSession {
        session_id: Uuid::new_v4(),
        user_id,
        prompt,
        list_type,
        candidate_pool,
        total_pairs,
        completed_pairs: 0,
        status: SessionStatus::Active,
        judged_pairs: HashSet::new(),
        winner_tally: HashMap::new(),
        judgment_count: 0,
        started_at: now,
        updated_at: now,
        completed_at: None,
    }
}

fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Round-robins the candidate pool, skipping already-judged unordered
/// pairs, until `completed_pairs >= total_pairs`, at which point the
/// session is marked completed and `None` is returned.
pub fn next_pair(session: &mut PairwiseSession, now: DateTime<Utc>) -> Option<(Uuid, Uuid)> {
    if session.status != SessionStatus::Active {
        return None;
    }
    if session.completed_pairs >= session.total_pairs {
        complete_session(session, now);
        return None;
    }

    for (i, &a) in session.candidate_pool.iter().enumerate() {
        for &b in &session.candidate_pool[i + 1..] {
            if !session.judged_pairs.contains(&pair_key(a, b)) {
                return Some((a, b));
            }
        }
    }

    complete_session(session, now);
    None
}

fn complete_session(session: &mut PairwiseSession, now: DateTime<Utc>) {
    session.status = SessionStatus::Completed;
    session.completed_at = Some(now);
    session.updated_at = now;
}

#[derive(Debug, Clone, Default)]
pub struct InterpretableProfile {
    pub genre_weights: HashMap<String, f32>,
    pub decade_weights: HashMap<i32, f32>,
    pub language_weights: HashMap<String, f32>,
    pub obscurity_preference: f32,
    pub freshness_preference: f32,
    pub judgment_count: u32,
}

impl InterpretableProfile {
    pub fn new() -> Self {
        Self {
            obscurity_preference: 0.5,
            freshness_preference: 0.5,
            ..Default::default()
        }
    }
}

pub struct SubmitOutcome {
    pub session_completed: bool,
}

/// Records a judgment and advances session progress. Genre, decade,
/// language, obscurity, and freshness weight updates are applied
/// in-place on `profile` only for a clear `a`/`b` winner — `both`/
/// `neither` move the embedding (via [`update_preference_vector`], called
/// separately by the caller once it has resolved both embeddings) but do
/// not attribute interpretable credit to a single item.
#[instrument(skip(session, profile, candidate_a, candidate_b))]
pub fn submit_judgment(session: &mut PairwiseSession, profile: &mut InterpretableProfile, candidate_a: &Candidate, candidate_b: &Candidate, winner: Winner, now: DateTime<Utc>) -> SubmitOutcome {
    session.judged_pairs.insert(pair_key(candidate_a.candidate_id, candidate_b.candidate_id));

    if winner != Winner::Skip {
        if session.completed_pairs < session.total_pairs {
            session.completed_pairs += 1;
        }
        session.updated_at = now;
    }

    let session_completed = if winner != Winner::Skip && session.completed_pairs >= session.total_pairs {
        complete_session(session, now);
        true
    } else {
        false
    };

    if matches!(winner, Winner::A | Winner::B) {
        let winner_id = if winner == Winner::A { candidate_a.candidate_id } else { candidate_b.candidate_id };
        *session.winner_tally.entry(winner_id).or_insert(0) += 1;

        let (winner_cand, loser_cand) = if winner == Winner::A { (candidate_a, candidate_b) } else { (candidate_b, candidate_a) };
        apply_interpretable_update(profile, winner_cand, loser_cand);
    }

    SubmitOutcome { session_completed }
}

/// `u <- u + α(v_winner - v_loser)` for a/b, a midpoint attraction for
/// `both`, a midpoint repulsion for `neither`; always renormalized.
pub fn update_preference_vector(current: &[f32], vec_a: &[f32], vec_b: &[f32], winner: Winner) -> Vec<f32> {
    let mut updated = current.to_vec();
    match winner {
        Winner::A => add_scaled(&mut updated, vec_a, vec_b, ALPHA),
        Winner::B => add_scaled(&mut updated, vec_b, vec_a, ALPHA),
        Winner::Both => {
            let avg = midpoint(vec_a, vec_b);
            move_toward(&mut updated, &avg, ALPHA * BOTH_ALPHA_FACTOR);
        }
        Winner::Neither => {
            let avg = midpoint(vec_a, vec_b);
            move_away(&mut updated, &avg, ALPHA * NEITHER_ALPHA_FACTOR);
        }
        Winner::Skip => {}
    }
    taste_core::math::normalize_in_place(&mut updated);
    updated
}

fn add_scaled(target: &mut [f32], plus: &[f32], minus: &[f32], alpha: f32) {
    for i in 0..target.len() {
        target[i] += alpha * (plus.get(i).copied().unwrap_or(0.0) - minus.get(i).copied().unwrap_or(0.0));
    }
}

fn midpoint(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| 0.5 * (x + y)).collect()
}

fn move_toward(target: &mut [f32], destination: &[f32], alpha: f32) {
    for i in 0..target.len() {
        target[i] += alpha * (destination.get(i).copied().unwrap_or(0.0) - target[i]);
    }
}

fn move_away(target: &mut [f32], destination: &[f32], alpha: f32) {
    for i in 0..target.len() {
        target[i] -= alpha * (destination.get(i).copied().unwrap_or(0.0) - target[i]);
    }
}

fn apply_interpretable_update(profile: &mut InterpretableProfile, winner: &Candidate, loser: &Candidate) {
    for genre in &winner.genres {
        *profile.genre_weights.entry(genre.to_lowercase()).or_insert(0.0) += BOOST;
    }
    for genre in &loser.genres {
        *profile.genre_weights.entry(genre.to_lowercase()).or_insert(0.0) -= BOOST * 0.5;
    }

    if let Some(year) = winner.year_or_from_date() {
        let decade = (year / 10) * 10;
        *profile.decade_weights.entry(decade).or_insert(0.0) += BOOST;
    }

    if !winner.original_language.is_empty() {
        *profile.language_weights.entry(winner.original_language.to_lowercase()).or_insert(0.0) += BOOST;
    }

    if winner.votes < loser.votes {
        profile.obscurity_preference = (profile.obscurity_preference + BOOST * 0.5).min(1.0);
    } else {
        profile.obscurity_preference = (profile.obscurity_preference - BOOST * 0.5).max(0.0);
    }

    if let (Some(wy), Some(ly)) = (winner.year_or_from_date(), loser.year_or_from_date()) {
        if wy > ly {
            profile.freshness_preference = (profile.freshness_preference + BOOST * 0.5).min(1.0);
        } else {
            profile.freshness_preference = (profile.freshness_preference - BOOST * 0.5).max(0.0);
        }
    }

    profile.judgment_count += 1;
}

#[derive(Debug, Clone)]
pub struct PersonaDelta {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub delta: String,
}

/// Ranks candidates by how often they won within the session and returns
/// up to `TOP_PREFERRED_COUNT` ids, most-preferred first.
pub fn top_preferred(session: &PairwiseSession) -> Vec<Uuid> {
    let mut tally: Vec<(Uuid, u32)> = session.winner_tally.iter().map(|(&id, &count)| (id, count)).collect();
    tally.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    tally.into_iter().take(TOP_PREFERRED_COUNT).map(|(id, _)| id).collect()
}

/// Generates a short persona delta from the session's top preferred
/// candidates. Skipped if the session has too few judgments or the LLM
/// is unavailable/returns an implausible-length response.
#[instrument(skip(llm, session, preferred))]
pub async fn generate_persona_delta(llm: &LlmClient, session: &PairwiseSession, preferred: &[&Candidate]) -> Option<PersonaDelta> {
    if session.judgment_count < MIN_JUDGMENTS_FOR_DELTA as u32 || preferred.is_empty() || !llm.is_configured() {
        return None;
    }

    let items_text: Vec<String> = preferred
        .iter()
        .map(|c| {
            let genres: Vec<&String> = c.genres.iter().take(3).collect();
            let genre_str = genres.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
            format!("- {} ({}) [{}]", c.title, c.year_or_from_date().map(|y| y.to_string()).unwrap_or_default(), genre_str)
        })
        .collect();

    let prompt = format!(
        "Session context: \"{}\"\nUser preferred these items:\n{}\n\nGenerate a 2-3 sentence persona delta summarizing this user's preferences from this session. Focus on patterns (genres, themes, styles). Return ONLY the plain text summary.",
        session.prompt,
        items_text.join("\n")
    );

    let text = llm
        .complete("You are a concise persona summarizer.", &prompt, 0.3, 150, std::time::Duration::from_secs(60))
        .await
        .ok()?;

    let delta = text.trim().to_string();
    if delta.len() < 20 || delta.len() > 500 {
        return None;
    }

    Some(PersonaDelta {
        session_id: session.session_id,
        timestamp: Utc::now(),
        delta,
    })
}

/// Appends a micro-update, keeping at most the last `MAX_MICRO_UPDATES`.
pub fn push_persona_delta(existing: &mut Vec<PersonaDelta>, delta: PersonaDelta) {
    existing.push(delta);
    if existing.len() > MAX_MICRO_UPDATES {
        existing.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use taste_catalog::{MediaType, TvFields};

    fn candidate(id: Uuid, genres: &[&str], year: i32, votes: u64) -> Candidate {
        Candidate {
            candidate_id: id,
            tmdb_id: 1,
            trakt_id: None,
            media_type: MediaType::Movie,
            title: "T".into(),
            original_title: "T".into(),
            year: Some(year),
            overview: String::new(),
            tagline: String::new(),
            genres: genres.iter().map(|s| s.to_string()).collect(),
            keywords: vec![],
            cast: vec![],
            directors: vec![],
            writers: vec![],
            production_companies: vec![],
            production_countries: vec![],
            spoken_languages: vec![],
            runtime_minutes: None,
            rating: 7.0,
            votes,
            popularity: 10.0,
            original_language: "en".into(),
            release_date: NaiveDate::from_ymd_opt(year, 1, 1),
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
    fn create_session_chooses_total_pairs_by_pool_size() {
        let now = Utc::now();
        let big: Vec<Uuid> = (0..15).map(|_| Uuid::new_v4()).collect();
        assert_eq!(create_session(Uuid::new_v4(), "p".into(), big, "chat".into(), now).total_pairs, 20);

        let medium: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        assert_eq!(create_session(Uuid::new_v4(), "p".into(), medium, "chat".into(), now).total_pairs, 15);

        let small: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        assert_eq!(create_session(Uuid::new_v4(), "p".into(), small, "chat".into(), now).total_pairs, 10);
    }

    #[test]
    fn next_pair_skips_already_judged_and_completes_when_exhausted() {
        let now = Utc::now();
        let pool: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut session = create_session(Uuid::new_v4(), "p".into(), pool.clone(), "chat".into(), now);
        session.total_pairs = 3;

        let mut seen = HashSet::new();
        for _ in 0..3 {
            let pair = next_pair(&mut session, now).expect("pair available");
            assert!(seen.insert(pair_key(pair.0, pair.1)));
            session.judged_pairs.insert(pair_key(pair.0, pair.1));
            session.completed_pairs += 1;
        }
        assert!(next_pair(&mut session, now).is_none());
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn update_preference_vector_moves_toward_winner() {
        let current = vec![1.0, 0.0];
        let vec_a = vec![0.0, 1.0];
        let vec_b = vec![0.0, -1.0];
        let updated = update_preference_vector(&current, &vec_a, &vec_b, Winner::A);
        assert!(updated[1] > 0.0);
    }

    #[test]
    fn interpretable_update_boosts_winner_genres_and_penalizes_loser() {
        let mut profile = InterpretableProfile::new();
        let winner = candidate(Uuid::new_v4(), &["Comedy"], 2020, 100);
        let loser = candidate(Uuid::new_v4(), &["Horror"], 2000, 500);
        apply_interpretable_update(&mut profile, &winner, &loser);
        assert!(profile.genre_weights["comedy"] > 0.0);
        assert!(profile.genre_weights["horror"] < 0.0);
        assert!(profile.obscurity_preference > 0.5);
        assert!(profile.freshness_preference > 0.5);
    }

    #[test]
    fn top_preferred_orders_by_win_count() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Utc::now();
        let mut session = create_session(Uuid::new_v4(), "p".into(), vec![a, b], "chat".into(), now);
        session.winner_tally.insert(a, 3);
        session.winner_tally.insert(b, 1);
        assert_eq!(top_preferred(&session)[0], a);
    }

    #[tokio::test]
    async fn persona_delta_skipped_when_llm_unconfigured() {
        let llm = LlmClient::new(None);
        let now = Utc::now();
        let session = create_session(Uuid::new_v4(), "p".into(), vec![Uuid::new_v4()], "chat".into(), now);
        let c = candidate(Uuid::new_v4(), &["Comedy"], 2020, 1);
        let result = generate_persona_delta(&llm, &session, &[&c]).await;
        assert!(result.is_none());
    }
}
