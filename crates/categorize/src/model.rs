//! Multinomial naive Bayes over description tokens.
//!
//! Counts live in ordered maps so that training and prediction are fully
//! deterministic and the serialized artifact is stable across runs.

use caixa_core::text::fold_accents;
use caixa_core::TransactionFeatures;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Turns transaction features into model tokens: word unigrams and bigrams of
/// the cleaned description, plus the direction and an order-of-magnitude
/// bucket of the amount.
pub fn tokenize(features: &TransactionFeatures) -> Vec<String> {
    let folded = fold_accents(&features.clean_description);
    let words: Vec<&str> = folded.split_whitespace().collect();

    let mut tokens: Vec<String> = words.iter().map(|w| w.to_string()).collect();
    tokens.extend(words.windows(2).map(|pair| format!("{}_{}", pair[0], pair[1])));
    tokens.push(format!("dir:{}", features.direction));
    tokens.push(format!("amt:{}", amount_bucket(features.amount.abs().to_cents())));
    tokens
}

/// Number of digits in the whole-currency part: 0 below R$ 1, 1 up to R$ 9.99,
/// 2 up to R$ 99.99 and so on.
fn amount_bucket(cents: i64) -> u32 {
    let reais = cents / 100;
    if reais <= 0 {
        0
    } else {
        reais.ilog10() + 1
    }
}

/// One label space (categories, or clients).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelModel {
    documents: u64,
    label_documents: BTreeMap<String, u64>,
    token_counts: BTreeMap<String, BTreeMap<String, u64>>,
    token_totals: BTreeMap<String, u64>,
    vocabulary: BTreeSet<String>,
}

impl LabelModel {
    pub fn observe(&mut self, tokens: &[String], label: &str) {
        self.documents += 1;
        *self.label_documents.entry(label.to_string()).or_default() += 1;

        let counts = self.token_counts.entry(label.to_string()).or_default();
        for token in tokens {
            *counts.entry(token.clone()).or_default() += 1;
            self.vocabulary.insert(token.clone());
        }
        *self.token_totals.entry(label.to_string()).or_default() += tokens.len() as u64;
    }

    pub fn documents(&self) -> u64 {
        self.documents
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.label_documents.keys().map(String::as_str)
    }

    pub fn label_count(&self) -> usize {
        self.label_documents.len()
    }

    /// Most probable label with its posterior probability. Ties go to the
    /// lexicographically smallest label. `None` when nothing was observed.
    pub fn predict(&self, tokens: &[String]) -> Option<(String, f64)> {
        if self.documents == 0 {
            return None;
        }

        let vocabulary = self.vocabulary.len() as f64;
        let known: Vec<&String> = tokens.iter().filter(|t| self.vocabulary.contains(*t)).collect();

        let scores: Vec<(&str, f64)> = self
            .label_documents
            .iter()
            .map(|(label, &docs)| {
                let prior = (docs as f64 / self.documents as f64).ln();
                let total = self.token_totals.get(label).copied().unwrap_or(0) as f64;
                let counts = self.token_counts.get(label);
                let likelihood: f64 = known
                    .iter()
                    .map(|t| {
                        let count = counts.and_then(|c| c.get(*t)).copied().unwrap_or(0) as f64;
                        ((count + 1.0) / (total + vocabulary)).ln()
                    })
                    .sum();
                (label.as_str(), prior + likelihood)
            })
            .collect();

        // Log-sum-exp keeps the posterior finite for long descriptions.
        let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
        let normalizer: f64 = scores.iter().map(|(_, s)| (s - max).exp()).sum();

        let mut best: Option<(&str, f64)> = None;
        for (label, score) in &scores {
            if best.map_or(true, |(_, b)| *score > b) {
                best = Some((label, *score));
            }
        }
        best.map(|(label, score)| (label.to_string(), (score - max).exp() / normalizer))
    }
}

/// Both label spaces plus bookkeeping; this is what gets persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    pub examples_seen: u64,
    pub categories: LabelModel,
    pub clients: LabelModel,
}
