//! Keyword retrieval engine
//!
//! An in-memory inverted index with BM25 ranking. The index is a monotonic
//! mutable structure: mutations go through `&mut self` (callers wrap the
//! index in a reader-writer lock), searches are `&self` and run in parallel.
//!
//! IDF values are cached per term and the cache is dropped on any mutation,
//! since document frequency and the document count feed the formula.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::KeywordConfig;

/// Fixed English stopword set
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "had",
        "has", "have", "he", "her", "his", "if", "in", "into", "is", "it", "its", "my", "no",
        "not", "of", "on", "or", "our", "she", "so", "that", "the", "their", "them", "then",
        "there", "these", "they", "this", "to", "was", "we", "were", "what", "when", "which",
        "who", "will", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Unicode-aware deterministic tokenizer: lowercase, split on
/// non-alphanumeric runs, drop tokens shorter than 2 chars and stopwords.
/// No stemming.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !STOPWORDS.contains(t))
        .map(String::from)
        .collect()
}

/// Per-document index entry
#[derive(Debug, Clone)]
struct DocEntry {
    /// Token count used during indexing
    len: u32,
    /// Sum of term frequencies, used in tie-breaking
    tf_sum: u32,
    /// Metadata exposed to filters at index time
    metadata: HashMap<String, serde_json::Value>,
    /// Terms this document contributed postings for
    terms: Vec<String>,
}

/// A scored search hit
pub type ScoredDoc = (String, f32);

/// Inverted index with probabilistic ranking
pub struct KeywordIndex {
    config: KeywordConfig,
    /// term -> doc_id -> term frequency
    postings: HashMap<String, HashMap<String, u32>>,
    docs: HashMap<String, DocEntry>,
    /// Running total of document lengths, for avgdl
    total_len: u64,
    idf_cache: Mutex<HashMap<String, f32>>,
}

impl KeywordIndex {
    pub fn new(config: KeywordConfig) -> Self {
        Self {
            config,
            postings: HashMap::new(),
            docs: HashMap::new(),
            total_len: 0,
            idf_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of indexed documents
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Running average document length
    pub fn avgdl(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_len as f32 / self.docs.len() as f32
        }
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.docs.contains_key(doc_id)
    }

    /// Index (or re-index) a document
    pub fn index(
        &mut self,
        doc_id: &str,
        text: &str,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) {
        if self.docs.contains_key(doc_id) {
            self.remove(doc_id);
        }

        let tokens = tokenize(text);
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0) += 1;
        }

        let len = tokens.len() as u32;
        let tf_sum = tf.values().sum();
        let terms: Vec<String> = tf.keys().cloned().collect();

        for (term, freq) in tf {
            self.postings
                .entry(term)
                .or_default()
                .insert(doc_id.to_string(), freq);
        }

        self.docs.insert(
            doc_id.to_string(),
            DocEntry {
                len,
                tf_sum,
                metadata: metadata.unwrap_or_default(),
                terms,
            },
        );
        self.total_len += len as u64;
        self.idf_cache.lock().clear();
    }

    /// Remove a document and its postings
    pub fn remove(&mut self, doc_id: &str) -> bool {
        let Some(entry) = self.docs.remove(doc_id) else {
            return false;
        };

        for term in &entry.terms {
            if let Some(doc_map) = self.postings.get_mut(term) {
                doc_map.remove(doc_id);
                if doc_map.is_empty() {
                    self.postings.remove(term);
                }
            }
        }

        self.total_len -= entry.len as u64;
        self.idf_cache.lock().clear();
        true
    }

    /// Top-k documents for a free-text query. Empty queries and queries of
    /// only unknown tokens return an empty list; this never fails.
    ///
    /// Candidates are documents holding a posting for at least one query
    /// term that also pass every metadata filter. The ordering is total:
    /// score descending, then `doc_len * tf_sum` descending, then doc id
    /// ascending, so repeated runs produce identical output.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&HashMap<String, serde_json::Value>>,
    ) -> Vec<ScoredDoc> {
        if k == 0 {
            return Vec::new();
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut seen_terms: HashSet<&str> = HashSet::new();
        let mut candidates: HashMap<&str, f32> = HashMap::new();

        let n = self.docs.len() as f32;
        let avgdl = self.avgdl();
        let k1 = self.config.k1;
        let b = self.config.b;

        for term in &query_terms {
            if !seen_terms.insert(term.as_str()) {
                continue;
            }
            let Some(doc_map) = self.postings.get(term) else {
                continue;
            };

            let idf = self.idf(term, doc_map.len() as f32, n);

            for (doc_id, &freq) in doc_map {
                let entry = &self.docs[doc_id.as_str()];
                if !passes_filters(&entry.metadata, filters) {
                    continue;
                }

                let tf = freq as f32;
                let norm = 1.0 - b + b * entry.len as f32 / avgdl;
                let contribution = idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
                *candidates.entry(doc_id.as_str()).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(String, f32, u64)> = candidates
            .into_iter()
            .map(|(doc_id, score)| {
                let entry = &self.docs[doc_id];
                let tie = entry.len as u64 * entry.tf_sum as u64;
                (doc_id.to_string(), score, tie)
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        ranked.into_iter().map(|(id, score, _)| (id, score)).collect()
    }

    /// Cached IDF: `ln((N - df + 0.5) / (df + 0.5) + 1)`
    fn idf(&self, term: &str, df: f32, n: f32) -> f32 {
        let mut cache = self.idf_cache.lock();
        if let Some(&idf) = cache.get(term) {
            return idf;
        }
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
        cache.insert(term.to_string(), idf);
        idf
    }
}

fn passes_filters(
    metadata: &HashMap<String, serde_json::Value>,
    filters: Option<&HashMap<String, serde_json::Value>>,
) -> bool {
    let Some(filters) = filters else {
        return true;
    };
    filters
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index_with(docs: &[(&str, &str)]) -> KeywordIndex {
        let mut index = KeywordIndex::new(KeywordConfig::default());
        for (id, text) in docs {
            index.index(id, text, None);
        }
        index
    }

    #[test]
    fn test_tokenize_contract() {
        assert_eq!(
            tokenize("Python is a Language!"),
            vec!["python", "language"]
        );
        // short tokens dropped, stopwords removed, no stemming
        assert_eq!(tokenize("I am walking"), vec!["am", "walking"]);
        assert_eq!(tokenize(""), Vec::<String>::new());
        assert_eq!(tokenize("the of and"), Vec::<String>::new());
    }

    #[test]
    fn test_tokenize_unicode() {
        assert_eq!(tokenize("Grüße aus Köln"), vec!["grüße", "aus", "köln"]);
    }

    #[test]
    fn test_tokenize_deterministic() {
        let text = "Mixed CASE text, with punctuation; and-hyphens";
        assert_eq!(tokenize(text), tokenize(text));
    }

    #[test]
    fn test_index_and_doc_stats() {
        let index = index_with(&[("d1", "python is a language"), ("d2", "rust language")]);
        assert_eq!(index.doc_count(), 2);
        // d1 -> [python, language], d2 -> [rust, language]
        assert_eq!(index.avgdl(), 2.0);
    }

    #[test]
    fn test_search_ranking_scenario() {
        let index = index_with(&[
            ("d1", "python is a language"),
            ("d2", "python python machine learning"),
            ("d3", "the weather is nice"),
        ]);

        let hits = index.search("python learning", 10, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "d2");
        assert_eq!(hits[1].0, "d1");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn test_search_empty_query() {
        let index = index_with(&[("d1", "content here")]);
        assert!(index.search("", 10, None).is_empty());
        assert!(index.search("the of", 10, None).is_empty());
    }

    #[test]
    fn test_search_unknown_tokens_ignored() {
        let index = index_with(&[("d1", "alpha beta gamma")]);
        let hits = index.search("alpha zzzzz", 10, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "d1");
    }

    #[test]
    fn test_remove_deletes_postings() {
        let mut index = KeywordIndex::new(KeywordConfig::default());
        index.index("d1", "alpha beta", None);
        index.index("d2", "alpha gamma", None);

        assert!(index.remove("d1"));
        assert!(!index.remove("d1"));
        assert_eq!(index.doc_count(), 1);

        let hits = index.search("alpha", 10, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "d2");
        assert!(index.search("beta", 10, None).is_empty());
    }

    #[test]
    fn test_reindex_replaces_postings() {
        let mut index = KeywordIndex::new(KeywordConfig::default());
        index.index("d1", "alpha beta", None);
        index.index("d1", "gamma delta", None);

        assert_eq!(index.doc_count(), 1);
        assert!(index.search("alpha", 10, None).is_empty());
        assert_eq!(index.search("gamma", 10, None).len(), 1);
    }

    #[test]
    fn test_metadata_filters() {
        let mut index = KeywordIndex::new(KeywordConfig::default());
        index.index(
            "d1",
            "shared topic words",
            Some(HashMap::from([("kind".to_string(), json!("fact"))])),
        );
        index.index(
            "d2",
            "shared topic words",
            Some(HashMap::from([("kind".to_string(), json!("note"))])),
        );

        let filters = HashMap::from([("kind".to_string(), json!("fact"))]);
        let hits = index.search("shared topic", 10, Some(&filters));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "d1");
    }

    #[test]
    fn test_deterministic_tie_break() {
        // Identical docs score identically; order falls back to doc id
        let index = index_with(&[("b", "same words here"), ("a", "same words here")]);
        let hits = index.search("same words", 10, None);
        assert_eq!(hits[0].0, "a");
        assert_eq!(hits[1].0, "b");
        assert_eq!(hits[0].1, hits[1].1);
    }

    #[test]
    fn test_repeated_search_identical_output() {
        let index = index_with(&[
            ("d1", "apple banana cherry"),
            ("d2", "apple banana"),
            ("d3", "apple cherry date"),
            ("d4", "banana cherry"),
        ]);
        let first = index.search("apple banana cherry", 10, None);
        for _ in 0..10 {
            assert_eq!(index.search("apple banana cherry", 10, None), first);
        }
    }

    #[test]
    fn test_idf_cache_invalidation() {
        let mut index = index_with(&[("d1", "alpha beta"), ("d2", "alpha")]);
        let before = index.search("alpha", 10, None);

        index.index("d3", "alpha gamma", None);
        let after = index.search("alpha", 10, None);

        // df(alpha) changed from 2 to 3, so the cached IDF must not be reused
        assert_ne!(before[0].1, after.iter().find(|h| h.0 == "d1").unwrap().1);
    }

    #[test]
    fn test_k_zero_returns_empty() {
        let index = index_with(&[("d1", "alpha")]);
        assert!(index.search("alpha", 0, None).is_empty());
    }
}
