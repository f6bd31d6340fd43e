//! Hand-rolled TF-IDF (§4.8 step 3): no ML crate in this workspace's
//! dependency stack provides a vectorizer, so term counting and IDF
//! weighting are implemented directly, following the bespoke-analyzer
//! shape used elsewhere in the corpus for small, in-process text models.

use std::collections::HashMap;

const MAX_FEATURES: usize = 5000;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

/// A TF-IDF space fit over a corpus of documents, capped at
/// `MAX_FEATURES` terms by document frequency (most common terms kept).
pub struct TfIdfModel {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl TfIdfModel {
    pub fn fit(documents: &[String]) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let mut seen = std::collections::HashSet::new();
            for token in tokenize(doc) {
                if seen.insert(token.clone()) {
                    *doc_freq.entry(token).or_insert(0) += 1;
                }
            }
        }

        let mut terms: Vec<(String, usize)> = doc_freq.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        terms.truncate(MAX_FEATURES);

        let n = documents.len().max(1) as f32;
        let mut vocabulary = HashMap::with_capacity(terms.len());
        let mut idf = Vec::with_capacity(terms.len());
        for (i, (term, df)) in terms.into_iter().enumerate() {
            vocabulary.insert(term, i);
            idf.push((n / (1.0 + df as f32)).ln() + 1.0);
        }

        Self { vocabulary, idf }
    }

    /// Transforms text into a dense TF-IDF vector over the fitted
    /// vocabulary; out-of-vocabulary terms are ignored.
    pub fn transform(&self, text: &str) -> Vec<f32> {
        let mut counts = vec![0.0f32; self.vocabulary.len()];
        let tokens = tokenize(text);
        let total = tokens.len().max(1) as f32;
        for token in tokens {
            if let Some(&idx) = self.vocabulary.get(&token) {
                counts[idx] += 1.0;
            }
        }
        for (i, count) in counts.iter_mut().enumerate() {
            *count = (*count / total) * self.idf[i];
        }
        counts
    }

    pub fn cosine(&self, a: &str, b: &str) -> f32 {
        let va = self.transform(a);
        let vb = self.transform(b);
        taste_core::math::cosine_similarity(&va, &vb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_documents_have_cosine_one() {
        let docs = vec!["a cozy romantic comedy".to_string(), "an intense war drama".to_string()];
        let model = TfIdfModel::fit(&docs);
        let sim = model.cosine("a cozy romantic comedy", "a cozy romantic comedy");
        assert!((sim - 1.0).abs() < 1e-4);
    }

    #[test]
    fn unrelated_documents_score_lower_than_identical() {
        let docs = vec!["a cozy romantic comedy".to_string(), "an intense war drama".to_string()];
        let model = TfIdfModel::fit(&docs);
        let same = model.cosine("a cozy romantic comedy", "a cozy romantic comedy");
        let different = model.cosine("a cozy romantic comedy", "an intense war drama");
        assert!(same > different);
    }

    #[test]
    fn vocabulary_is_capped_at_max_features() {
        let docs: Vec<String> = (0..6000).map(|i| format!("term{i}")).collect();
        let model = TfIdfModel::fit(&docs);
        assert!(model.vocabulary.len() <= MAX_FEATURES);
    }
}
