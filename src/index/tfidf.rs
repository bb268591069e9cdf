//! Semantic similarity search via TF-IDF cosine distance.

use std::collections::HashMap;

use super::tokenize::{extract_text, tokenize};
use serde_json::Value;

/// key -> sparse log-normalized term-frequency vector.
pub struct TfIdfIndex {
    vectors: HashMap<String, HashMap<String, f64>>,
    doc_freq: HashMap<String, i64>,
}

impl TfIdfIndex {
    pub fn new() -> Self {
        Self { vectors: HashMap::new(), doc_freq: HashMap::new() }
    }

    fn doc_count(&self) -> usize {
        self.vectors.len()
    }

    fn compute_tf(words: &[String]) -> HashMap<String, f64> {
        let mut counts: HashMap<String, f64> = HashMap::new();
        for word in words {
            *counts.entry(word.clone()).or_insert(0.0) += 1.0;
        }
        for value in counts.values_mut() {
            *value = 1.0 + value.ln();
        }
        counts
    }

    pub fn add(&mut self, key: &str, value: &Value) {
        let text = extract_text(value);
        let words = tokenize(&text);
        if words.is_empty() {
            return;
        }
        if let Some(old) = self.vectors.get(key) {
            for word in old.keys() {
                if let Some(df) = self.doc_freq.get_mut(word) {
                    *df -= 1;
                }
            }
        }

        let tf = Self::compute_tf(&words);
        let unique: std::collections::HashSet<&String> = tf.keys().collect();
        for word in unique {
            *self.doc_freq.entry(word.clone()).or_insert(0) += 1;
        }
        self.vectors.insert(key.to_string(), tf);
    }

    pub fn remove(&mut self, key: &str) {
        let Some(vector) = self.vectors.remove(key) else { return };
        for word in vector.keys() {
            if let Some(df) = self.doc_freq.get_mut(word) {
                *df -= 1;
                if *df <= 0 {
                    self.doc_freq.remove(word);
                }
            }
        }
    }

    fn apply_idf(&self, tf: &HashMap<String, f64>) -> HashMap<String, f64> {
        let doc_count = self.doc_count() as f64;
        let mut out = HashMap::new();
        for (word, &tf_val) in tf {
            let df = *self.doc_freq.get(word).unwrap_or(&0);
            if df > 0 {
                out.insert(word.clone(), tf_val * (doc_count / df as f64).ln());
            }
        }
        out
    }

    fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
        let dot: f64 = a.iter().map(|(word, &va)| va * b.get(word).copied().unwrap_or(0.0)).sum();
        let mag_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
        let mag_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
        if mag_a == 0.0 || mag_b == 0.0 {
            0.0
        } else {
            dot / (mag_a * mag_b)
        }
    }

    /// Returns the top-k `(key, similarity)` pairs with positive similarity,
    /// sorted descending.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        let words = tokenize(query);
        if words.is_empty() {
            return Vec::new();
        }
        let query_tf = Self::compute_tf(&words);
        let query_vec = self.apply_idf(&query_tf);

        let mut results: Vec<(String, f64)> = self
            .vectors
            .keys()
            .filter_map(|key| {
                let doc_vec = self.apply_idf(&self.vectors[key]);
                let sim = Self::cosine_similarity(&query_vec, &doc_vec);
                (sim > 0.0).then_some((key.clone(), sim))
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }
}
