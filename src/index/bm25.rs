//! Full-text ranked search via BM25 over an inverted index.

use std::collections::HashMap;

use super::tokenize::{extract_text, tokenize};
use serde_json::Value;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// word -> {key: term frequency in that document}
/// plus per-document length and insertion order, for BM25 scoring with
/// stable tie-breaking among equal scores.
pub struct InvertedIndex {
    postings: HashMap<String, HashMap<String, u32>>,
    doc_lengths: HashMap<String, u32>,
    insertion_order: HashMap<String, usize>,
    next_seq: usize,
    avg_doc_length: f64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self {
            postings: HashMap::new(),
            doc_lengths: HashMap::new(),
            insertion_order: HashMap::new(),
            next_seq: 0,
            avg_doc_length: 0.0,
        }
    }

    fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn add(&mut self, key: &str, value: &Value) {
        let text = extract_text(value);
        let words = tokenize(&text);
        if words.is_empty() {
            return;
        }
        if !self.doc_lengths.contains_key(key) {
            self.insertion_order.entry(key.to_string()).or_insert_with(|| {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            });
        }

        let mut term_freq: HashMap<&str, u32> = HashMap::new();
        for word in &words {
            *term_freq.entry(word.as_str()).or_insert(0) += 1;
        }
        for (word, freq) in term_freq {
            self.postings.entry(word.to_string()).or_default().insert(key.to_string(), freq);
        }
        self.doc_lengths.insert(key.to_string(), words.len() as u32);
        self.recompute_avg_length();
    }

    pub fn remove(&mut self, key: &str) {
        if !self.doc_lengths.contains_key(key) {
            return;
        }
        let mut empty_words = Vec::new();
        for (word, docs) in self.postings.iter_mut() {
            if docs.remove(key).is_some() && docs.is_empty() {
                empty_words.push(word.clone());
            }
        }
        for word in empty_words {
            self.postings.remove(&word);
        }
        self.doc_lengths.remove(key);
        self.insertion_order.remove(key);
        self.recompute_avg_length();
    }

    fn recompute_avg_length(&mut self) {
        let count = self.doc_count();
        self.avg_doc_length = if count > 0 {
            self.doc_lengths.values().map(|&l| l as f64).sum::<f64>() / count as f64
        } else {
            0.0
        };
    }

    /// Returns the top-k `(key, score)` pairs by BM25, ties broken by
    /// insertion order among equal scores.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        let query_words = tokenize(query);
        if query_words.is_empty() {
            return Vec::new();
        }
        let doc_count = self.doc_count() as f64;
        let mut scores: HashMap<String, f64> = HashMap::new();

        for word in &query_words {
            let Some(docs) = self.postings.get(word) else { continue };
            let df = docs.len() as f64;
            let idf = ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (key, &tf) in docs {
                let doc_len = *self.doc_lengths.get(key).unwrap_or(&1) as f64;
                let denom = tf as f64 + K1 * (1.0 - B + B * doc_len / self.avg_doc_length.max(1.0));
                let numer = tf as f64 * (K1 + 1.0);
                *scores.entry(key.clone()).or_insert(0.0) += idf * numer / denom;
            }
        }

        let mut results: Vec<(String, f64)> = scores.into_iter().collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ia = self.insertion_order.get(&a.0).copied().unwrap_or(usize::MAX);
                    let ib = self.insertion_order.get(&b.0).copied().unwrap_or(usize::MAX);
                    ia.cmp(&ib)
                })
        });
        results.truncate(top_k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_ranks_by_term_overlap() {
        let mut idx = InvertedIndex::new();
        idx.add("doc1", &json!("the quick brown fox"));
        idx.add("doc2", &json!("a quick brown dog"));
        idx.add("doc3", &json!("the lazy cat sleeps"));
        let results = idx.search("quick brown", 3);
        let keys: Vec<&str> = results.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"doc1"));
        assert!(keys.contains(&"doc2"));
        assert!(!keys.contains(&"doc3") || results.iter().all(|(k, s)| k != "doc3" || *s == 0.0));
    }

    #[test]
    fn delete_then_readd_restores_prior_scores() {
        let mut idx = InvertedIndex::new();
        idx.add("a", &json!("hello world"));
        idx.add("b", &json!("hello there"));
        let before = idx.search("hello", 10);
        idx.add("c", &json!("temporary document"));
        idx.remove("c");
        let after = idx.search("hello", 10);
        assert_eq!(before, after);
    }

    #[test]
    fn empty_query_returns_nothing() {
        let mut idx = InvertedIndex::new();
        idx.add("a", &json!("hello"));
        assert!(idx.search("   ", 10).is_empty());
    }
}
