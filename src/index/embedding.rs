use std::collections::{HashMap, HashSet};

use super::tokenize;

/// Semantic search over TF-IDF document vectors with cosine similarity.
///
/// Documents are stored as sparse log-normalized term-frequency vectors; the
/// IDF weighting is applied at query time so it always reflects the current
/// corpus.
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    /// key -> sparse TF vector
    vectors: HashMap<String, HashMap<String, f64>>,
    /// word -> number of documents containing it
    doc_freq: HashMap<String, usize>,
    doc_count: usize,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn compute_tf(words: &[String]) -> HashMap<String, f64> {
        let mut tf: HashMap<String, f64> = HashMap::new();
        for word in words {
            *tf.entry(word.clone()).or_insert(0.0) += 1.0;
        }
        for weight in tf.values_mut() {
            *weight = 1.0 + weight.ln();
        }
        tf
    }

    pub fn add(&mut self, key: &str, text: &str) {
        let words = tokenize(text);
        if words.is_empty() {
            return;
        }

        match self.vectors.get(key) {
            None => self.doc_count += 1,
            Some(old) => {
                // Re-indexing an existing document: retract its old
                // contribution to the document frequencies first.
                for word in old.keys() {
                    if let Some(df) = self.doc_freq.get_mut(word) {
                        *df = df.saturating_sub(1);
                    }
                }
                self.doc_freq.retain(|_, df| *df > 0);
            }
        }

        let unique: HashSet<&String> = words.iter().collect();
        for word in unique {
            *self.doc_freq.entry(word.clone()).or_insert(0) += 1;
        }

        self.vectors.insert(key.to_string(), Self::compute_tf(&words));
    }

    pub fn remove(&mut self, key: &str) {
        let Some(vector) = self.vectors.remove(key) else {
            return;
        };
        for word in vector.keys() {
            if let Some(df) = self.doc_freq.get_mut(word) {
                *df = df.saturating_sub(1);
            }
        }
        self.doc_freq.retain(|_, df| *df > 0);
        self.doc_count -= 1;
    }

    fn apply_idf(&self, tf: &HashMap<String, f64>) -> HashMap<String, f64> {
        let mut tfidf = HashMap::new();
        for (word, weight) in tf {
            let df = self.doc_freq.get(word).copied().unwrap_or(0);
            if df > 0 {
                let idf = (self.doc_count as f64 / df as f64).ln();
                tfidf.insert(word.clone(), weight * idf);
            }
        }
        tfidf
    }

    fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
        let dot: f64 = a
            .iter()
            .filter_map(|(word, x)| b.get(word).map(|y| x * y))
            .sum();
        let mag_a = a.values().map(|x| x * x).sum::<f64>().sqrt();
        let mag_b = b.values().map(|x| x * x).sum::<f64>().sqrt();
        if mag_a == 0.0 || mag_b == 0.0 {
            return 0.0;
        }
        dot / (mag_a * mag_b)
    }

    /// Top-k most similar documents as (key, cosine similarity) pairs.
    pub fn semantic_search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        let words = tokenize(query);
        if words.is_empty() {
            return Vec::new();
        }

        let query_vec = self.apply_idf(&Self::compute_tf(&words));

        let mut similarities: Vec<(String, f64)> = self
            .vectors
            .iter()
            .filter_map(|(key, doc_tf)| {
                let doc_vec = self.apply_idf(doc_tf);
                let sim = Self::cosine(&query_vec, &doc_vec);
                (sim > 0.0).then(|| (key.clone(), sim))
            })
            .collect();

        similarities.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        similarities.truncate(top_k);
        similarities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similar_document_ranks_first() {
        let mut index = EmbeddingIndex::new();
        index.add("doc1", "machine learning and data science");
        index.add("doc2", "cooking recipes and baking bread");
        index.add("doc3", "deep learning for data analysis");

        let results = index.semantic_search("data science learning", 10);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, "doc1");
        assert!(results.iter().all(|(key, _)| key != "doc2"));
    }

    #[test]
    fn test_remove_updates_corpus() {
        let mut index = EmbeddingIndex::new();
        index.add("doc1", "unique marker words");
        index.add("doc2", "other content entirely");
        index.remove("doc1");

        assert!(index.semantic_search("marker", 10).is_empty());
    }

    #[test]
    fn test_reindex_replaces_old_vector() {
        let mut index = EmbeddingIndex::new();
        index.add("doc1", "old topic");
        index.add("doc1", "new subject matter");
        index.add("doc2", "padding document");

        assert!(index.semantic_search("old", 10).is_empty());
        assert_eq!(index.semantic_search("subject", 10)[0].0, "doc1");
    }
}
