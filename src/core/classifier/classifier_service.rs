use super::bayes::NaiveBayesModel;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier backend error: {0}")]
    BackendError(String),
}

// ============================================================================
// MODELS
// ============================================================================

/// Labeled example sets supplied by a chat's policy for classifier
/// training. Missing categories default to empty lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingExamples {
    #[serde(default)]
    pub toxic: Vec<String>,
    #[serde(default)]
    pub spam: Vec<String>,
    #[serde(default)]
    pub normal: Vec<String>,
}

/// Scores for the two categories every backend must report. Categories
/// absent from the underlying distribution clamp to 0.0, so callers
/// never special-case missing keys.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassScores {
    pub toxic: f64,
    pub spam: f64,
}

impl ClassScores {
    pub fn from_map(scores: &HashMap<String, f64>) -> Self {
        ClassScores {
            toxic: scores.get("toxic").copied().unwrap_or(0.0),
            spam: scores.get("spam").copied().unwrap_or(0.0),
        }
    }
}

// ============================================================================
// CLASSIFIER TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Scores a message against the chat's training data.
    ///
    /// Implementations own their model caching; callers treat every
    /// call as cheap and never pre-train.
    async fn score(
        &self,
        chat_id: &str,
        training: &TrainingExamples,
        text: &str,
    ) -> Result<ClassScores, ClassifierError>;
}

// Blanket implementation so a shared Arc<BayesClassifier> (or any other
// backend behind an Arc) can be handed to the engine directly.
#[async_trait]
impl<C: Classifier + ?Sized> Classifier for Arc<C> {
    async fn score(
        &self,
        chat_id: &str,
        training: &TrainingExamples,
        text: &str,
    ) -> Result<ClassScores, ClassifierError> {
        (**self).score(chat_id, training, text).await
    }
}

// ============================================================================
// NAIVE BAYES BACKEND
// ============================================================================

/// In-process backend that trains a [`NaiveBayesModel`] per
/// (chat, training signature) and caches it for the process lifetime.
///
/// The signature is an order-independent hash of the trimmed, lowercased
/// example lists: edits to unrelated policy fields keep hitting the cached
/// model, while any edit to the examples themselves retrains. Stale models
/// are never evicted; the cache is bounded by distinct signatures seen.
#[derive(Debug, Default)]
pub struct BayesClassifier {
    models: DashMap<(String, u64), Arc<NaiveBayesModel>>,
}

impl BayesClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalized_examples(list: &[String]) -> Vec<String> {
        let mut normalized: Vec<String> = list.iter().map(|s| s.trim().to_lowercase()).collect();
        normalized.sort();
        normalized
    }
}

#[async_trait]
impl Classifier for BayesClassifier {
    async fn score(
        &self,
        chat_id: &str,
        training: &TrainingExamples,
        text: &str,
    ) -> Result<ClassScores, ClassifierError> {
        let toxic = Self::normalized_examples(&training.toxic);
        let spam = Self::normalized_examples(&training.spam);
        let normal = Self::normalized_examples(&training.normal);

        let mut hasher = DefaultHasher::new();
        toxic.hash(&mut hasher);
        spam.hash(&mut hasher);
        normal.hash(&mut hasher);
        let signature = hasher.finish();

        // The entry guard serializes concurrent first access to a key, so
        // a model is trained at most once per (chat, signature).
        let model = {
            let entry = self
                .models
                .entry((chat_id.to_string(), signature))
                .or_insert_with(|| {
                    tracing::debug!(
                        "Training classifier model for chat {} (signature {:x})",
                        chat_id,
                        signature
                    );
                    // The model trains on the normalized lists, matching
                    // what the signature was computed from.
                    Arc::new(NaiveBayesModel::train(&[
                        ("toxic", toxic.as_slice()),
                        ("spam", spam.as_slice()),
                        ("normal", normal.as_slice()),
                    ]))
                });
            Arc::clone(entry.value())
        };

        Ok(ClassScores::from_map(&model.score(text)))
    }
}

// ============================================================================
// TESTS
// ============================================================================
