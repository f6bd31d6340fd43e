//! C15 Phase Detector: windowed clustering of a user's watch history into
//! "viewing phases", grounded on the HDBSCAN/k-means clustering, cluster
//! scoring, and label-generation pipeline of the original phase detection
//! service. The exclusive per-user lock and persistence named alongside
//! it belong to the orchestrating engine crate; this crate is the pure
//! algorithm over already-fetched watch events and embeddings.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use taste_catalog::MediaType;
use taste_core::math::cosine_similarity;
use taste_llm::LlmClient;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const WATCH_WINDOW_DAYS: i64 = 14;
pub const MIN_CLUSTER_SIZE: usize = 2;
pub const PHASE_MIN_SCORE_ACTIVE: f32 = 0.55;
pub const PHASE_MIN_SCORE_MINOR: f32 = 0.35;
pub const PHASE_CLOSE_DAYS: i64 = 14;
pub const FRANCHISE_DOMINANCE_THRESHOLD: f32 = 0.4;
pub const PHASE_OVERLAP_SIMILARITY_THRESHOLD: f32 = 0.6;
pub const CLUSTER_SELECTION_EPSILON: f32 = 0.1;
pub const MIN_SAMPLES: usize = 1;
pub const DEFAULT_PREDICT_LOOKBACK_DAYS: i64 = 42;
pub const FUTURE_PHASE_LOOKBACK_DAYS: i64 = 30;

/// A watched item enriched with the catalog/embedding context phase
/// detection needs; assembled by the caller from watch history + catalog
/// + the primary vector index.
#[derive(Debug, Clone)]
pub struct PhaseItem {
    pub trakt_id: i64,
    pub tmdb_id: Option<i64>,
    pub title: String,
    pub media_type: MediaType,
    pub watched_at: DateTime<Utc>,
    pub collection_id: Option<i64>,
    pub collection_name: Option<String>,
    pub genres: Vec<String>,
    pub keywords: Vec<String>,
    pub poster: Option<String>,
    pub runtime_minutes: Option<i32>,
    pub language: Option<String>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseType {
    Active,
    Minor,
    Historical,
}

#[derive(Debug, Clone)]
pub struct ClusterMetrics {
    pub cohesion: f32,
    pub watch_density: f32,
    pub franchise_dominance: f32,
    pub thematic_consistency: f32,
    pub phase_score: f32,
    pub dominant_genres: Vec<String>,
    pub dominant_keywords: Vec<String>,
    pub dominant_collection_id: Option<i64>,
    pub dominant_collection_name: Option<String>,
    pub item_count: usize,
    pub movie_count: usize,
    pub show_count: usize,
}

#[derive(Debug, Clone)]
pub struct ViewingPhase {
    pub phase_id: Uuid,
    pub user_id: Uuid,
    pub label: String,
    pub icon: String,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub tmdb_ids: Vec<i64>,
    pub trakt_ids: Vec<i64>,
    pub media_types: Vec<MediaType>,
    pub dominant_genres: Vec<String>,
    pub dominant_keywords: Vec<String>,
    pub franchise_id: Option<i64>,
    pub franchise_name: Option<String>,
    pub cohesion: f32,
    pub watch_density: f32,
    pub franchise_dominance: f32,
    pub thematic_consistency: f32,
    pub phase_score: f32,
    pub item_count: usize,
    pub movie_count: usize,
    pub show_count: usize,
    pub avg_runtime_minutes: Option<i32>,
    pub top_language: Option<String>,
    pub phase_type: PhaseType,
    pub explanation: String,
    pub representative_posters: Vec<String>,
}

/// Splits `[earliest, latest]` into non-overlapping `days`-long windows.
pub fn generate_time_windows(earliest: DateTime<Utc>, latest: DateTime<Utc>, days: i64) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut current = earliest;
    let step = ChronoDuration::days(days);
    while current < latest {
        let window_end = (current + step).min(latest);
        windows.push((current, window_end));
        current += step;
    }
    windows
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Density-reachability clustering approximating HDBSCAN's behavior for
/// `min_samples=1`: two points are directly connected if their cosine
/// distance is within `cluster_selection_epsilon`; clusters are the
/// connected components of that graph, reject any smaller than
/// `min_cluster_size` as noise (`-1`).
fn density_reachability_cluster(points: &[Vec<f32>], min_cluster_size: usize, eps: f32) -> Vec<i32> {
    let n = points.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if cosine_distance(&points[i], &points[j]) <= eps {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }

    let mut component_sizes: HashMap<usize, usize> = HashMap::new();
    let roots: Vec<usize> = (0..n).map(|i| find(&mut parent, i)).collect();
    for &r in &roots {
        *component_sizes.entry(r).or_insert(0) += 1;
    }

    roots
        .iter()
        .map(|&r| {
            if component_sizes[&r] >= min_cluster_size {
                r as i32
            } else {
                -1
            }
        })
        .collect()
}

fn kmeans_once(points: &[Vec<f32>], k: usize, seed: u64) -> Vec<usize> {
    let n = points.len();
    let dim = points.first().map(|p| p.len()).unwrap_or(0);
    let mut rng_state = seed.max(1);
    let mut next = || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        rng_state
    };

    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let mut used = HashSet::new();
    while centroids.len() < k.min(n) {
        let idx = (next() as usize) % n;
        if used.insert(idx) {
            centroids.push(points[idx].clone());
        }
    }

    let mut assignments = vec![0usize; n];
    for _ in 0..25 {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = cosine_distance(point, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            if assignments[i] != best {
                changed = true;
            }
            assignments[i] = best;
        }

        let mut sums = vec![vec![0.0f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (i, point) in points.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (d, v) in point.iter().enumerate() {
                sums[c][d] += v;
            }
        }
        for c in 0..centroids.len() {
            if counts[c] > 0 {
                for d in 0..dim {
                    centroids[c][d] = sums[c][d] / counts[c] as f32;
                }
            }
        }

        if !changed {
            break;
        }
    }

    assignments
}

fn silhouette_score(points: &[Vec<f32>], labels: &[usize]) -> f32 {
    let n = points.len();
    if n < 2 {
        return -1.0;
    }
    let unique: HashSet<usize> = labels.iter().copied().collect();
    if unique.len() < 2 {
        return -1.0;
    }

    let mut total = 0.0f32;
    for i in 0..n {
        let own_label = labels[i];
        let mut same_dist_sum = 0.0f32;
        let mut same_count = 0usize;
        let mut other_cluster_avg: HashMap<usize, (f32, usize)> = HashMap::new();

        for j in 0..n {
            if i == j {
                continue;
            }
            let dist = cosine_distance(&points[i], &points[j]);
            if labels[j] == own_label {
                same_dist_sum += dist;
                same_count += 1;
            } else {
                let entry = other_cluster_avg.entry(labels[j]).or_insert((0.0, 0));
                entry.0 += dist;
                entry.1 += 1;
            }
        }

        let a = if same_count > 0 { same_dist_sum / same_count as f32 } else { 0.0 };
        let b = other_cluster_avg
            .values()
            .map(|(sum, count)| sum / *count as f32)
            .fold(f32::INFINITY, f32::min);
        let b = if b.is_finite() { b } else { 0.0 };

        let s = if a.max(b) > 0.0 { (b - a) / a.max(b) } else { 0.0 };
        total += s;
    }

    total / n as f32
}

/// Clusters `points` via the density-reachability pass first; falls back
/// to k-means over `k ∈ [2, min(4, n-1)]`, choosing the k with the best
/// silhouette score, if the density pass finds fewer than 2 distinct
/// clusters.
pub fn cluster_embeddings(points: &[Vec<f32>]) -> Option<Vec<i32>> {
    if points.len() < MIN_CLUSTER_SIZE {
        return None;
    }

    let density_labels = density_reachability_cluster(points, MIN_CLUSTER_SIZE, CLUSTER_SELECTION_EPSILON);
    let unique_non_noise: HashSet<i32> = density_labels.iter().copied().filter(|&l| l != -1).collect();
    if unique_non_noise.len() >= 1 && density_labels.iter().any(|&l| l != -1) {
        debug!(clusters = unique_non_noise.len(), "density-reachability clustering succeeded");
        return Some(density_labels);
    }

    let max_k = (points.len() - 1).min(4);
    if max_k < 2 {
        return None;
    }

    let mut best_labels: Option<Vec<usize>> = None;
    let mut best_score = f32::NEG_INFINITY;
    for k in 2..=max_k {
        let labels = kmeans_once(points, k, 42 + k as u64);
        let score = silhouette_score(points, &labels);
        if score > best_score {
            best_score = score;
            best_labels = Some(labels);
        }
    }

    best_labels.map(|labels| labels.into_iter().map(|l| l as i32).collect())
}

fn most_common<'a, I: Iterator<Item = &'a String>>(items: I) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        *counts.entry(item.clone()).or_insert(0) += 1;
    }
    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    pairs
}

/// Computes the §4.15 cluster metrics for one cluster of watch items.
pub fn compute_phase_metrics(cluster_items: &[&PhaseItem], total_window_watches: usize) -> ClusterMetrics {
    let cohesion = if cluster_items.len() > 1 {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for i in 0..cluster_items.len() {
            for j in (i + 1)..cluster_items.len() {
                sum += cosine_similarity(&cluster_items[i].embedding, &cluster_items[j].embedding);
                count += 1;
            }
        }
        if count > 0 {
            sum / count as f32
        } else {
            0.5
        }
    } else {
        1.0
    };

    let watch_count = cluster_items.len();
    let watch_density = watch_count as f32 / total_window_watches.max(1) as f32;

    let collection_ids: Vec<i64> = cluster_items.iter().filter_map(|w| w.collection_id).collect();
    let (franchise_dominance, dominant_collection_id, dominant_collection_name) = if !collection_ids.is_empty() {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for id in &collection_ids {
            *counts.entry(*id).or_insert(0) += 1;
        }
        let (dominant_id, count) = counts.into_iter().max_by_key(|(_, c)| *c).unwrap();
        let dominance = count as f32 / watch_count as f32;
        let name = cluster_items.iter().find(|w| w.collection_id == Some(dominant_id)).and_then(|w| w.collection_name.clone());
        (dominance, Some(dominant_id), name)
    } else {
        (0.0, None, None)
    };

    let all_genres: Vec<&String> = cluster_items.iter().flat_map(|w| w.genres.iter()).collect();
    let genre_counts = most_common(all_genres.into_iter());
    let dominant_genres: Vec<String> = genre_counts.iter().take(3).map(|(g, _)| g.clone()).collect();
    let thematic_consistency = genre_counts.first().map(|(_, count)| *count as f32 / watch_count as f32).unwrap_or(0.0);

    let all_keywords: Vec<&String> = cluster_items.iter().flat_map(|w| w.keywords.iter()).collect();
    let keyword_counts = most_common(all_keywords.into_iter());
    let dominant_keywords: Vec<String> = keyword_counts.iter().take(5).map(|(k, _)| k.clone()).collect();

    let phase_score = 0.35 * cohesion + 0.25 * watch_density + 0.20 * franchise_dominance + 0.20 * thematic_consistency;

    let movie_count = cluster_items.iter().filter(|w| w.media_type == MediaType::Movie).count();
    let show_count = cluster_items.iter().filter(|w| w.media_type == MediaType::Show).count();

    ClusterMetrics {
        cohesion,
        watch_density,
        franchise_dominance,
        thematic_consistency,
        phase_score,
        dominant_genres,
        dominant_keywords,
        dominant_collection_id,
        dominant_collection_name,
        item_count: watch_count,
        movie_count,
        show_count,
    }
}

pub fn decide_phase_type(phase_score: f32, window_end: DateTime<Utc>, now: DateTime<Utc>) -> Option<PhaseType> {
    if phase_score < PHASE_MIN_SCORE_MINOR {
        None
    } else if phase_score >= PHASE_MIN_SCORE_ACTIVE {
        if now - window_end <= ChronoDuration::days(PHASE_CLOSE_DAYS) {
            Some(PhaseType::Active)
        } else {
            Some(PhaseType::Historical)
        }
    } else {
        Some(PhaseType::Minor)
    }
}

const GENRE_ICONS: &[(&str, &str)] = &[
    ("sci-fi", "\u{1F680}"),
    ("science fiction", "\u{1F680}"),
    ("thriller", "\u{1F9E8}"),
    ("horror", "\u{1F47B}"),
    ("comedy", "\u{1F602}"),
    ("romance", "\u{2764}\u{FE0F}"),
    ("action", "\u{1F4A5}"),
    ("adventure", "\u{1F5FA}\u{FE0F}"),
    ("drama", "\u{1F3AD}"),
    ("fantasy", "\u{1F9D9}"),
    ("mystery", "\u{1F50D}"),
    ("crime", "\u{1F575}\u{FE0F}"),
    ("documentary", "\u{1F4F9}"),
    ("animation", "\u{1F3A8}"),
    ("family", "\u{1F46A}"),
    ("war", "\u{2694}\u{FE0F}"),
    ("western", "\u{1F920}"),
    ("music", "\u{1F3B5}"),
    ("history", "\u{1F4DC}"),
];

fn genre_icon(genre: &str) -> &'static str {
    let lower = genre.to_lowercase();
    GENRE_ICONS.iter().find(|(key, _)| lower.contains(key)).map(|(_, icon)| *icon).unwrap_or("\u{1F3AC}")
}

const GENERIC_KEYWORDS: &[&str] = &["Action", "Drama", "Story", "Film", "Movie", "Show", "Series"];

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn dynamic_phase_name(metrics: &ClusterMetrics) -> String {
    let mut parts = Vec::new();

    if let Some(first_kw) = metrics.dominant_keywords.first() {
        let titled = title_case(first_kw);
        if !GENERIC_KEYWORDS.contains(&titled.as_str()) {
            parts.push(titled);
        }
    }

    if parts.is_empty() && !metrics.dominant_genres.is_empty() {
        if metrics.dominant_genres.len() == 1 {
            parts.push(title_case(&metrics.dominant_genres[0]));
        } else {
            parts.push(format!("{} & {}", title_case(&metrics.dominant_genres[0]), title_case(&metrics.dominant_genres[1])));
        }
    }

    let media_suffix = if metrics.movie_count > 0 && metrics.show_count == 0 {
        Some("Movies")
    } else if metrics.show_count > 0 && metrics.movie_count == 0 {
        Some("Shows")
    } else if metrics.movie_count > metrics.show_count * 2 {
        Some("Films")
    } else if metrics.show_count > metrics.movie_count * 2 {
        Some("Series")
    } else {
        None
    };

    if let Some(suffix) = media_suffix {
        if !parts.iter().any(|p| p.to_lowercase().contains(&suffix.to_lowercase())) {
            parts.push(suffix.to_string());
        }
    }

    if parts.is_empty() {
        parts.push("Mixed Content".to_string());
    }

    let name = parts.join(" ");
    if name.len() > 50 {
        format!("{}...", &name[..47])
    } else {
        name
    }
}

/// Rule-based `(label, icon)` fallback used when the LLM is unavailable
/// or its output fails validation.
pub fn generate_phase_label_rule_based(metrics: &ClusterMetrics) -> (String, String) {
    if metrics.franchise_dominance >= FRANCHISE_DOMINANCE_THRESHOLD {
        if let Some(name) = &metrics.dominant_collection_name {
            return (format!("{name} Phase"), "\u{1F3AC}".to_string());
        }
    }

    let label = dynamic_phase_name(metrics);
    let icon = metrics.dominant_genres.first().map(|g| genre_icon(g)).unwrap_or("\u{1F4FA}").to_string();
    (label, icon)
}

pub fn generate_explanation_rule_based(metrics: &ClusterMetrics, days_span: i64) -> String {
    let genre_text = if metrics.dominant_genres.is_empty() {
        "various genres".to_string()
    } else {
        metrics.dominant_genres.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
    };
    let keyword_text = if metrics.dominant_keywords.is_empty() {
        "diverse themes".to_string()
    } else {
        metrics.dominant_keywords.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
    };
    format!("You watched {} {genre_text} titles over {days_span} days. Common themes include {keyword_text}.", metrics.item_count)
}

/// Tries the LLM for a creative `(label, explanation, icon)` triple;
/// falls back to the rule-based generators on any failure or invalid
/// output shape.
#[instrument(skip(llm, persona, representative_titles, metrics))]
pub async fn generate_phase_label(llm: &LlmClient, persona: &str, representative_titles: &[String], metrics: &ClusterMetrics, days_span: i64) -> (String, String, String) {
    if llm.is_configured() {
        if let Some((label, explanation, icon)) = try_llm_label(llm, persona, representative_titles, metrics).await {
            return (label, explanation, icon);
        }
    }
    let (label, icon) = generate_phase_label_rule_based(metrics);
    let explanation = generate_explanation_rule_based(metrics, days_span);
    (label, explanation, icon)
}

async fn try_llm_label(llm: &LlmClient, persona: &str, representative_titles: &[String], metrics: &ClusterMetrics) -> Option<(String, String, String)> {
    let genres = metrics.dominant_genres.join(", ");
    let keywords = metrics.dominant_keywords.join(", ");
    let items_text = if representative_titles.is_empty() {
        "Limited metadata available".to_string()
    } else {
        representative_titles.iter().map(|t| format!("- {t}")).collect::<Vec<_>>().join("\n")
    };

    let prompt = format!(
        "User profile: {persona}\n\nPhase details:\n- Items watched: {}\n- Cohesion: {:.2}\n- Genres: {}\n- Themes: {}\n\nRepresentative content:\n{items_text}\n\nGenerate a creative 3-6 word phase label, a 1-2 sentence explanation of why the user watched this, and an emoji icon. Output ONLY JSON: {{\"label\": \"...\", \"explanation\": \"...\", \"icon\": \"...\"}}",
        metrics.item_count,
        metrics.cohesion,
        if genres.is_empty() { "Mixed" } else { &genres },
        if keywords.is_empty() { "Varied" } else { &keywords },
    );

    let text = llm.complete("You generate short, evocative viewing-phase labels.", &prompt, 0.7, 150, std::time::Duration::from_secs(60)).await.ok()?;

    #[derive(serde::Deserialize)]
    struct LabelResponse {
        label: String,
        explanation: String,
        #[serde(default)]
        icon: Option<String>,
    }

    let parsed: LabelResponse = taste_llm::extract_json(&text).ok()?;
    let label = parsed.label.trim().to_string();
    let explanation = parsed.explanation.trim().to_string();
    if label.len() < 3 || label.len() > 80 || explanation.len() < 10 {
        return None;
    }
    let label = if label.len() > 60 { format!("{}...", &label[..57]) } else { label };
    let explanation = if explanation.len() > 200 { format!("{}...", &explanation[..197]) } else { explanation };
    let icon = parsed.icon.unwrap_or_else(|| "\u{1F3AC}".to_string());
    Some((label, explanation, icon))
}

/// Picks up to `count` posters, most-recently-watched first.
pub fn select_representative_posters(cluster_items: &[&PhaseItem], count: usize) -> Vec<String> {
    let mut sorted: Vec<&&PhaseItem> = cluster_items.iter().collect();
    sorted.sort_by(|a, b| b.watched_at.cmp(&a.watched_at));
    sorted.into_iter().filter_map(|w| w.poster.clone()).take(count).collect()
}

/// 60%-overlap-by-tmdb-id existence check against already-detected
/// phases overlapping the same time window.
pub fn find_similar_phase<'a>(existing: &'a [ViewingPhase], cluster_tmdb_ids: &HashSet<i64>, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<&'a ViewingPhase> {
    existing
        .iter()
        .filter(|p| p.start_at <= end && p.end_at.unwrap_or(end) >= start)
        .find(|p| {
            let phase_ids: HashSet<i64> = p.tmdb_ids.iter().copied().collect();
            let overlap = cluster_tmdb_ids.intersection(&phase_ids).count();
            let denom = cluster_tmdb_ids.len().max(phase_ids.len()).max(1);
            (overlap as f32 / denom as f32) > PHASE_OVERLAP_SIMILARITY_THRESHOLD
        })
}

/// Closes active phases with no watches among their members in the last
/// `PHASE_CLOSE_DAYS` days.
pub fn close_stale_phases(phases: &mut [ViewingPhase], recently_watched_tmdb_ids: &HashSet<i64>, now: DateTime<Utc>) {
    for phase in phases.iter_mut() {
        if phase.phase_type != PhaseType::Active || phase.end_at.is_some() {
            continue;
        }
        let has_recent_watch = phase.tmdb_ids.iter().any(|id| recently_watched_tmdb_ids.contains(id));
        if !has_recent_watch {
            phase.end_at = Some(now - ChronoDuration::days(PHASE_CLOSE_DAYS));
            phase.phase_type = PhaseType::Historical;
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhasePrediction {
    pub label: String,
    pub icon: String,
    pub explanation: String,
    pub confidence: f32,
    pub dominant_genres: Vec<String>,
    pub dominant_keywords: Vec<String>,
    pub representative_posters: Vec<String>,
    pub item_count: usize,
    pub movie_count: usize,
    pub show_count: usize,
    pub source: PredictionSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionSource {
    Pairwise,
    WatchHistory,
}

/// Predicts the next viewing phase from recent pairwise-judgment winners:
/// aggregate genre/keyword counts from the winning items plus the
/// already-scored candidate pool the caller obtained via multi-vector
/// search. Requires at least 3 winners to produce a prediction.
pub fn predict_from_pairwise_judgments(winner_genres: &[String], winner_keywords: &[String], winner_count: usize, top_candidate_titles: &[String]) -> Option<PhasePrediction> {
    if winner_count < 3 {
        return None;
    }
    let genre_counts = most_common(winner_genres.iter());
    let keyword_counts = most_common(winner_keywords.iter());
    let top_genres: Vec<String> = genre_counts.iter().take(3).map(|(g, _)| g.clone()).collect();
    let top_keywords: Vec<String> = keyword_counts.iter().take(5).map(|(k, _)| k.clone()).collect();

    if top_genres.is_empty() {
        return None;
    }

    let label = prediction_label(&top_genres, &top_keywords);
    let explanation = format!(
        "Based on your recent preferences, you're showing interest in {} content with themes like {}.",
        top_genres.iter().take(2).cloned().collect::<Vec<_>>().join(", "),
        top_keywords.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
    );

    Some(PhasePrediction {
        label,
        icon: genre_icon(&top_genres[0]).to_string(),
        explanation,
        confidence: 0.75,
        dominant_genres: top_genres,
        dominant_keywords: top_keywords,
        representative_posters: Vec::new(),
        item_count: top_candidate_titles.len(),
        movie_count: 0,
        show_count: 0,
        source: PredictionSource::Pairwise,
    })
}

fn prediction_label(genres: &[String], keywords: &[String]) -> String {
    if let Some(first_kw) = keywords.first() {
        let titled = title_case(first_kw);
        if !GENERIC_KEYWORDS.contains(&titled.as_str()) {
            return format!("Emerging {titled} Phase");
        }
    }
    match genres.len() {
        0 => "Emerging Viewing Phase".to_string(),
        1 => format!("Emerging {} Phase", title_case(&genres[0])),
        _ => format!("{} & {} Exploration", title_case(&genres[0]), title_case(&genres[1])),
    }
}

/// Watch-history fallback: clusters the last `lookback_days` of watches
/// and reports the dominant cluster as the predicted next phase. Requires
/// at least 5 recent watches and a dominant cluster of at least 3 items.
pub fn predict_from_watch_history(recent_items: &[PhaseItem], lookback_days: i64) -> Option<PhasePrediction> {
    if recent_items.len() < 5 {
        return None;
    }

    let embeddings: Vec<Vec<f32>> = recent_items.iter().map(|w| w.embedding.clone()).collect();
    let labels = cluster_embeddings(&embeddings)?;

    let mut cluster_sizes: HashMap<i32, usize> = HashMap::new();
    for &l in &labels {
        if l != -1 {
            *cluster_sizes.entry(l).or_insert(0) += 1;
        }
    }
    let dominant = *cluster_sizes.iter().max_by_key(|(_, c)| **c)?.0;

    let cluster_items: Vec<&PhaseItem> = recent_items.iter().zip(labels.iter()).filter(|(_, &l)| l == dominant).map(|(w, _)| w).collect();

    if cluster_items.len() < 3 {
        return None;
    }

    let metrics = compute_phase_metrics(&cluster_items, recent_items.len());
    let (label, icon) = generate_phase_label_rule_based(&metrics);
    let explanation = format!(
        "Based on your recent viewing over the past {lookback_days} days, you're likely entering a {}. This prediction is based on {} similar items you've recently watched.",
        label.to_lowercase(),
        cluster_items.len()
    );

    Some(PhasePrediction {
        label,
        icon,
        explanation,
        confidence: metrics.phase_score,
        dominant_genres: metrics.dominant_genres.clone(),
        dominant_keywords: metrics.dominant_keywords.clone(),
        representative_posters: select_representative_posters(&cluster_items, 6),
        item_count: metrics.item_count,
        movie_count: metrics.movie_count,
        show_count: metrics.show_count,
        source: PredictionSource::WatchHistory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(trakt_id: i64, genres: &[&str], embedding: Vec<f32>, watched_at: DateTime<Utc>) -> PhaseItem {
        PhaseItem {
            trakt_id,
            tmdb_id: Some(trakt_id),
            title: format!("item {trakt_id}"),
            media_type: MediaType::Movie,
            watched_at,
            collection_id: None,
            collection_name: None,
            genres: genres.iter().map(|s| s.to_string()).collect(),
            keywords: vec![],
            poster: Some(format!("poster{trakt_id}.jpg")),
            runtime_minutes: Some(100),
            language: Some("en".into()),
            embedding,
        }
    }

    #[test]
    fn generate_time_windows_splits_into_14_day_chunks() {
        let start = Utc::now() - ChronoDuration::days(30);
        let end = Utc::now();
        let windows = generate_time_windows(start, end, WATCH_WINDOW_DAYS);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].0, start);
    }

    #[test]
    fn single_item_cluster_has_perfect_cohesion() {
        let a = item(1, &["Comedy"], vec![1.0, 0.0], Utc::now());
        let metrics = compute_phase_metrics(&[&a], 1);
        assert_eq!(metrics.cohesion, 1.0);
        assert_eq!(metrics.franchise_dominance, 0.0);
    }

    #[test]
    fn density_reachability_groups_near_identical_embeddings() {
        let points = vec![vec![1.0, 0.0], vec![0.99, 0.01], vec![0.0, 1.0], vec![0.01, 0.99]];
        let labels = density_reachability_cluster(&points, 2, 0.1);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn franchise_dominance_drives_label_when_above_threshold() {
        let mut metrics = compute_phase_metrics(
            &[
                &{
                    let mut w = item(1, &["Action"], vec![1.0, 0.0], Utc::now());
                    w.collection_id = Some(99);
                    w.collection_name = Some("Fast Saga".into());
                    w
                },
                &{
                    let mut w = item(2, &["Action"], vec![1.0, 0.0], Utc::now());
                    w.collection_id = Some(99);
                    w.collection_name = Some("Fast Saga".into());
                    w
                },
            ],
            2,
        );
        metrics.franchise_dominance = 1.0;
        metrics.dominant_collection_name = Some("Fast Saga".into());
        let (label, icon) = generate_phase_label_rule_based(&metrics);
        assert_eq!(label, "Fast Saga Phase");
        assert_eq!(icon, "\u{1F3AC}");
    }

    #[test]
    fn phase_score_below_minor_threshold_is_rejected() {
        assert!(decide_phase_type(0.2, Utc::now(), Utc::now()).is_none());
    }

    #[test]
    fn active_phase_requires_recent_window() {
        let now = Utc::now();
        let recent = decide_phase_type(0.9, now, now);
        assert_eq!(recent, Some(PhaseType::Active));

        let stale_window_end = now - ChronoDuration::days(30);
        let historical = decide_phase_type(0.9, stale_window_end, now);
        assert_eq!(historical, Some(PhaseType::Historical));
    }

    #[test]
    fn predict_from_pairwise_requires_three_winners() {
        assert!(predict_from_pairwise_judgments(&["Comedy".into()], &[], 2, &[]).is_none());
        let prediction = predict_from_pairwise_judgments(&["Comedy".into(), "Comedy".into(), "Drama".into()], &[], 3, &["a".into()]);
        assert!(prediction.is_some());
        assert_eq!(prediction.unwrap().source, PredictionSource::Pairwise);
    }

    #[test]
    fn close_stale_phases_closes_phases_with_no_recent_watches() {
        let now = Utc::now();
        let mut phases = vec![ViewingPhase {
            phase_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            label: "Test".into(),
            icon: "\u{1F3AC}".into(),
            start_at: now - ChronoDuration::days(20),
            end_at: None,
            tmdb_ids: vec![1, 2],
            trakt_ids: vec![1, 2],
            media_types: vec![MediaType::Movie],
            dominant_genres: vec![],
            dominant_keywords: vec![],
            franchise_id: None,
            franchise_name: None,
            cohesion: 0.8,
            watch_density: 0.5,
            franchise_dominance: 0.0,
            thematic_consistency: 0.5,
            phase_score: 0.6,
            item_count: 2,
            movie_count: 2,
            show_count: 0,
            avg_runtime_minutes: Some(100),
            top_language: Some("en".into()),
            phase_type: PhaseType::Active,
            explanation: "because".into(),
            representative_posters: vec![],
        }];

        close_stale_phases(&mut phases, &HashSet::new(), now);
        assert_eq!(phases[0].phase_type, PhaseType::Historical);
        assert!(phases[0].end_at.is_some());
    }
}
