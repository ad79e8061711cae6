use super::tokenizer::tokenize;
use std::collections::{BTreeMap, HashMap, HashSet};

// Floor for class priors so an empty category never produces ln(0).
const MIN_PRIOR: f64 = 1e-9;

#[derive(Debug, Clone, Default)]
struct CategoryStats {
    token_counts: HashMap<String, u32>,
    token_total: u32,
    doc_count: u32,
}

/// Multinomial naive Bayes over tokenized message text. Immutable once
/// trained; the service layer caches instances per training signature.
#[derive(Debug, Clone)]
pub struct NaiveBayesModel {
    categories: BTreeMap<String, CategoryStats>,
    vocab_size: usize,
    total_docs: usize,
}

impl NaiveBayesModel {
    /// Builds a model from labeled example sets. Categories with empty
    /// example lists are kept and get the floor prior.
    pub fn train(samples: &[(&str, &[String])]) -> Self {
        let mut categories = BTreeMap::new();
        let mut vocab: HashSet<String> = HashSet::new();
        let mut total_docs = 0usize;

        for (name, docs) in samples {
            let mut stats = CategoryStats {
                doc_count: docs.len() as u32,
                ..CategoryStats::default()
            };
            total_docs += docs.len();
            for doc in docs.iter() {
                for token in tokenize(doc) {
                    vocab.insert(token.clone());
                    *stats.token_counts.entry(token).or_insert(0) += 1;
                    stats.token_total += 1;
                }
            }
            categories.insert((*name).to_string(), stats);
        }

        NaiveBayesModel {
            categories,
            vocab_size: vocab.len().max(1),
            total_docs: total_docs.max(1),
        }
    }

    /// Scores a message against every trained category and returns a
    /// probability distribution over them (softmax of log-posteriors).
    /// An untrained model (no categories at all) returns an empty map.
    pub fn score(&self, text: &str) -> HashMap<String, f64> {
        if self.categories.is_empty() {
            return HashMap::new();
        }

        let tokens = tokenize(text);
        let mut log_scores: Vec<(&str, f64)> = Vec::with_capacity(self.categories.len());
        for (name, stats) in &self.categories {
            let prior = (stats.doc_count as f64 / self.total_docs as f64).max(MIN_PRIOR);
            let denom = (stats.token_total as usize + self.vocab_size).max(1) as f64;
            let mut logp = prior.ln();
            for token in &tokens {
                let count = stats.token_counts.get(token).copied().unwrap_or(0);
                // Laplace smoothing keeps unseen tokens from zeroing the class.
                logp += ((f64::from(count) + 1.0) / denom).ln();
            }
            log_scores.push((name.as_str(), logp));
        }

        // Softmax shifted by the max log-score so exp() cannot underflow
        // the whole distribution at once.
        let max_lp = log_scores
            .iter()
            .map(|(_, lp)| *lp)
            .fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<(&str, f64)> = log_scores
            .iter()
            .map(|(name, lp)| (*name, (lp - max_lp).exp()))
            .collect();
        let z: f64 = exps.iter().map(|(_, v)| v).sum();
        let z = if z == 0.0 { 1.0 } else { z };

        exps.into_iter()
            .map(|(name, v)| (name.to_string(), v / z))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trained_category_outscores_the_rest() {
        let toxic = vec!["idiota".to_string()];
        let normal = vec!["hola".to_string()];
        let model = NaiveBayesModel::train(&[
            ("toxic", toxic.as_slice()),
            ("normal", normal.as_slice()),
        ]);

        let scores = model.score("idiota");
        let toxic_p = scores["toxic"];
        let normal_p = scores["normal"];
        assert!(toxic_p > normal_p, "expected toxic {toxic_p} > normal {normal_p}");
        assert!((toxic_p + normal_p - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let toxic = vec!["tonto feo".to_string()];
        let spam = vec!["gana dinero".to_string()];
        let model = NaiveBayesModel::train(&[
            ("toxic", toxic.as_slice()),
            ("spam", spam.as_slice()),
        ]);

        let first = model.score("gana dinero tonto");
        let second = model.score("gana dinero tonto");
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_category_set_scores_nothing() {
        let model = NaiveBayesModel::train(&[]);
        assert!(model.score("hola").is_empty());
    }

    #[test]
    fn test_stopword_only_message_falls_back_to_priors() {
        let toxic = vec!["idiota".to_string()];
        let normal = vec!["hola".to_string(), "buenos dias".to_string()];
        let model = NaiveBayesModel::train(&[
            ("toxic", toxic.as_slice()),
            ("normal", normal.as_slice()),
        ]);

        // "de el la" tokenizes to nothing, so only the priors remain.
        let scores = model.score("de el la");
        assert!((scores["toxic"] - 1.0 / 3.0).abs() < 1e-9);
        assert!((scores["normal"] - 2.0 / 3.0).abs() < 1e-9);
    }
}
