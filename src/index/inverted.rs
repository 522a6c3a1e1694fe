use std::collections::HashMap;

use super::tokenize;

// BM25 constants, the usual defaults.
const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Inverted index for full-text search with BM25 ranking.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    /// word -> key -> term frequency
    index: HashMap<String, HashMap<String, u32>>,
    /// key -> document length in words
    doc_lengths: HashMap<String, usize>,
    doc_count: usize,
    avg_doc_length: f64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &str, text: &str) {
        let words = tokenize(text);
        if words.is_empty() {
            return;
        }

        if !self.doc_lengths.contains_key(key) {
            self.doc_count += 1;
        }

        let mut term_freq: HashMap<String, u32> = HashMap::new();
        for word in &words {
            *term_freq.entry(word.clone()).or_insert(0) += 1;
        }
        for (word, freq) in term_freq {
            self.index
                .entry(word)
                .or_default()
                .insert(key.to_string(), freq);
        }

        self.doc_lengths.insert(key.to_string(), words.len());
        self.recompute_avg();
    }

    pub fn remove(&mut self, key: &str) {
        if self.doc_lengths.remove(key).is_none() {
            return;
        }

        self.index.retain(|_, docs| {
            docs.remove(key);
            !docs.is_empty()
        });

        self.doc_count -= 1;
        self.recompute_avg();
    }

    fn recompute_avg(&mut self) {
        self.avg_doc_length = if self.doc_count > 0 {
            self.doc_lengths.values().sum::<usize>() as f64 / self.doc_count as f64
        } else {
            0.0
        };
    }

    /// Top-k documents matching the query, as (key, BM25 score) pairs in
    /// descending score order. Ties break by key so results are stable.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        let query_words = tokenize(query);
        if query_words.is_empty() {
            return Vec::new();
        }

        let mut scores: HashMap<String, f64> = HashMap::new();
        for word in &query_words {
            let Some(docs) = self.index.get(word) else {
                continue;
            };

            let df = docs.len() as f64;
            let idf = ((self.doc_count as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (key, tf) in docs {
                let doc_len = self.doc_lengths.get(key).copied().unwrap_or(1) as f64;
                let tf = *tf as f64;
                let numerator = tf * (K1 + 1.0);
                let denominator =
                    tf + K1 * (1.0 - B + B * doc_len / self.avg_doc_length.max(1.0));
                *scores.entry(key.clone()).or_insert(0.0) += idf * numerator / denominator;
            }
        }

        let mut results: Vec<(String, f64)> = scores.into_iter().collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(top_k);
        results
    }
}
