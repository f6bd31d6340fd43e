//! C6 Lexical Index: a field-weighted, fuzziness-aware BM25 layer over
//! candidate text built on tantivy, grounded on the keyword-search shape
//! in the corpus's discovery search module.

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, FAST, INDEXED, STORED, STRING, TEXT};
use tantivy::tokenizer::TokenizerManager;
use tantivy::{Index, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

const WRITER_HEAP_BYTES: usize = 50_000_000;
const DEFAULT_TOP_K: usize = 12;

#[derive(Debug, Error)]
pub enum LexicalError {
    #[error("tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid candidate id: {0}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, LexicalError>;

#[derive(Debug, Clone, Default)]
pub struct LexicalDocument {
    pub id: Uuid,
    pub title: String,
    pub original_title: String,
    pub overview: String,
    pub cast: Vec<String>,
    pub created_by: Vec<String>,
    pub production_companies: Vec<String>,
    pub networks: Vec<String>,
    pub genres: Vec<String>,
    pub production_countries: Vec<String>,
    pub spoken_languages: Vec<String>,
    pub mood_tags: Vec<String>,
    pub tone_tags: Vec<String>,
    pub themes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: Uuid,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct LexicalQueryOptions {
    /// Disables fuzziness and limits matching to titles + people/org fields.
    pub strict_title_only: bool,
}

struct Fields {
    id: Field,
    title: Field,
    original_title: Field,
    overview: Field,
    cast: Field,
    created_by: Field,
    production_companies: Field,
    networks: Field,
    genres: Field,
    production_countries: Field,
    spoken_languages: Field,
    mood_tags: Field,
    tone_tags: Field,
    themes: Field,
}

pub struct LexicalIndex {
    index: Index,
    fields: Fields,
}

impl LexicalIndex {
    pub fn new(index_path: &str) -> Result<Self> {
        let mut builder = Schema::builder();
        let id = builder.add_text_field("id", STRING | STORED);
        let title = builder.add_text_field("title", TEXT | STORED | FAST);
        let original_title = builder.add_text_field("original_title", TEXT | STORED);
        let overview = builder.add_text_field("overview", TEXT | STORED);
        let cast = builder.add_text_field("cast", TEXT | STORED);
        let created_by = builder.add_text_field("created_by", TEXT | STORED);
        let production_companies = builder.add_text_field("production_companies", TEXT | STORED);
        let networks = builder.add_text_field("networks", TEXT | STORED);
        let genres = builder.add_text_field("genres", STRING | STORED);
        let production_countries = builder.add_text_field("production_countries", STRING | STORED);
        let spoken_languages = builder.add_text_field("spoken_languages", STRING | STORED);
        let mood_tags = builder.add_text_field("mood_tags", STRING | STORED);
        let tone_tags = builder.add_text_field("tone_tags", STRING | STORED);
        let themes = builder.add_text_field("themes", STRING | STORED);
        let _ = builder.add_i64_field("release_year", INDEXED | STORED);
        let schema = builder.build();

        let index = match Index::open_in_dir(index_path) {
            Ok(idx) => idx,
            Err(_) => {
                std::fs::create_dir_all(index_path)?;
                Index::create_in_dir(index_path, schema)?
            }
        };

        Ok(Self {
            index,
            fields: Fields {
                id,
                title,
                original_title,
                overview,
                cast,
                created_by,
                production_companies,
                networks,
                genres,
                production_countries,
                spoken_languages,
                mood_tags,
                tone_tags,
                themes,
            },
        })
    }

    fn tokenizer_manager(&self) -> TokenizerManager {
        self.index.tokenizers().clone()
    }

    #[instrument(skip(self, docs))]
    pub fn index_documents(&self, docs: &[LexicalDocument]) -> Result<()> {
        let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES)?;
        for doc in docs {
            let mut tdoc = TantivyDocument::default();
            tdoc.add_text(self.fields.id, doc.id.to_string());
            tdoc.add_text(self.fields.title, &doc.title);
            tdoc.add_text(self.fields.original_title, &doc.original_title);
            tdoc.add_text(self.fields.overview, &doc.overview);
            for v in &doc.cast {
                tdoc.add_text(self.fields.cast, v);
            }
            for v in &doc.created_by {
                tdoc.add_text(self.fields.created_by, v);
            }
            for v in &doc.production_companies {
                tdoc.add_text(self.fields.production_companies, v);
            }
            for v in &doc.networks {
                tdoc.add_text(self.fields.networks, v);
            }
            for v in &doc.genres {
                tdoc.add_text(self.fields.genres, v);
            }
            for v in &doc.production_countries {
                tdoc.add_text(self.fields.production_countries, v);
            }
            for v in &doc.spoken_languages {
                tdoc.add_text(self.fields.spoken_languages, v);
            }
            for v in &doc.mood_tags {
                tdoc.add_text(self.fields.mood_tags, v);
            }
            for v in &doc.tone_tags {
                tdoc.add_text(self.fields.tone_tags, v);
            }
            for v in &doc.themes {
                tdoc.add_text(self.fields.themes, v);
            }
            writer.add_document(tdoc)?;
        }
        writer.commit()?;
        Ok(())
    }

    /// Runs the field-weighted boolean-should query model and normalizes
    /// scores to [0,1] per query by dividing by the max score.
    #[instrument(skip(self, query_text))]
    pub async fn search(&self, query_text: &str, k: usize, opts: LexicalQueryOptions) -> Result<Vec<LexicalHit>> {
        match self.search_once(query_text, k, &opts).await {
            Ok(hits) => Ok(hits),
            Err(e) => {
                warn!(error = %e, "lexical search failed, retrying once");
                self.search_once(query_text, k, &opts).await
            }
        }
    }

    async fn search_once(&self, query_text: &str, k: usize, opts: &LexicalQueryOptions) -> Result<Vec<LexicalHit>> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let searcher = reader.searcher();
        let tokens = tokenize(&self.tokenizer_manager(), query_text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let fuzziness = if query_text.trim().len() >= 5 { 1 } else { 0 };
        let query: Box<dyn Query> = self.build_query(&tokens, fuzziness, opts);

        let top_docs = searcher.search(&*query, &TopDocs::with_limit(k.max(DEFAULT_TOP_K)))?;
        let mut hits: Vec<LexicalHit> = Vec::with_capacity(top_docs.len());
        let mut max_score = 0.0f32;
        for (score, address) in &top_docs {
            max_score = max_score.max(*score);
        }
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let id_str = doc
                .get_first(self.fields.id)
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let Ok(id) = Uuid::parse_str(id_str) else {
                continue;
            };
            let normalized = if max_score > 0.0 { score / max_score } else { 0.0 };
            hits.push(LexicalHit { id, score: normalized });
        }
        hits.truncate(k);
        Ok(hits)
    }

    fn build_query(&self, tokens: &[String], fuzziness: u8, opts: &LexicalQueryOptions) -> Box<dyn Query> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        // Exact phrase on title / original_title.
        push_phrase(&mut clauses, self.fields.title, tokens, 10.0);
        push_phrase(&mut clauses, self.fields.original_title, tokens, 8.0);

        if opts.strict_title_only {
            for token in tokens {
                push_fuzzy(&mut clauses, self.fields.title, token, fuzziness, 5.0);
                push_fuzzy(&mut clauses, self.fields.cast, token, fuzziness, 2.0);
                push_fuzzy(&mut clauses, self.fields.created_by, token, fuzziness, 2.0);
                push_fuzzy(&mut clauses, self.fields.production_companies, token, fuzziness, 2.0);
            }
            return Box::new(BooleanQuery::new(clauses));
        }

        // bool-prefix / phrase-prefix on title fields.
        for token in tokens {
            push_fuzzy(&mut clauses, self.fields.title, token, fuzziness, 4.0);
            push_fuzzy(&mut clauses, self.fields.title, token, 0, 3.0);
        }

        // fuzzy best_fields multi-match, per-field weights.
        let weighted_fields: [(Field, f32); 8] = [
            (self.fields.title, 5.0),
            (self.fields.cast, 4.0),
            (self.fields.created_by, 3.0),
            (self.fields.production_companies, 2.0),
            (self.fields.networks, 2.0),
            (self.fields.genres, 2.0),
            (self.fields.production_countries, 1.0),
            (self.fields.spoken_languages, 1.0),
        ];
        for token in tokens {
            for (field, weight) in weighted_fields {
                push_fuzzy(&mut clauses, field, token, fuzziness, weight);
            }
            push_fuzzy(&mut clauses, self.fields.mood_tags, token, 0, 1.0);
            push_fuzzy(&mut clauses, self.fields.tone_tags, token, 0, 1.0);
            push_fuzzy(&mut clauses, self.fields.themes, token, 0, 1.0);
        }

        Box::new(BooleanQuery::new(clauses))
    }
}

fn tokenize(_manager: &TokenizerManager, text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn push_phrase(clauses: &mut Vec<(Occur, Box<dyn Query>)>, field: Field, tokens: &[String], weight: f32) {
    if tokens.len() < 2 {
        return;
    }
    let terms: Vec<Term> = tokens.iter().map(|t| Term::from_field_text(field, t)).collect();
    let query = PhraseQuery::new(terms);
    clauses.push((Occur::Should, Box::new(BoostQuery::new(Box::new(query), weight))));
}

fn push_fuzzy(clauses: &mut Vec<(Occur, Box<dyn Query>)>, field: Field, token: &str, distance: u8, weight: f32) {
    let term = Term::from_field_text(field, token);
    let inner: Box<dyn Query> = if distance == 0 {
        Box::new(TermQuery::new(term, IndexRecordOption::WithFreqsAndPositions))
    } else {
        Box::new(FuzzyTermQuery::new_prefix(term, distance, true))
    };
    clauses.push((Occur::Should, Box::new(BoostQuery::new(inner, weight))));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_index() -> (tempfile::TempDir, LexicalIndex) {
        let dir = tempfile::tempdir().unwrap();
        let idx = LexicalIndex::new(dir.path().to_str().unwrap()).unwrap();
        (dir, idx)
    }

    fn sample_doc() -> LexicalDocument {
        LexicalDocument {
            id: Uuid::new_v4(),
            title: "The Matrix".to_string(),
            original_title: "The Matrix".to_string(),
            overview: "A hacker discovers reality is a simulation".to_string(),
            genres: vec!["action".into(), "sci-fi".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exact_title_match_scores_highest() {
        let (_dir, idx) = build_index();
        let matrix = sample_doc();
        let mut other = sample_doc();
        other.title = "Unrelated Documentary".to_string();
        other.overview = "Nothing about hackers here".to_string();
        idx.index_documents(&[matrix.clone(), other]).unwrap();

        let hits = idx.search("the matrix", 5, LexicalQueryOptions::default()).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, matrix.id);
        assert!(hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn empty_query_returns_no_hits() {
        let (_dir, idx) = build_index();
        idx.index_documents(&[sample_doc()]).unwrap();
        let hits = idx.search("   ", 5, LexicalQueryOptions::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn strict_title_only_ignores_overview_matches() {
        let (_dir, idx) = build_index();
        let mut doc = sample_doc();
        doc.title = "Calm Seas".to_string();
        doc.overview = "simulation of a hacker's mind".to_string();
        idx.index_documents(&[doc]).unwrap();

        let strict = idx
            .search("simulation", 5, LexicalQueryOptions { strict_title_only: true })
            .await
            .unwrap();
        assert!(strict.is_empty());
    }
}
