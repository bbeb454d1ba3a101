use caixa_core::text::{description_similarity, keyword_overlap, normalize_document_number};
use caixa_core::{days_between, BankTransaction, LedgerEntry, MatchRule, Money};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::MatchingConfig;

/// Ledger entries still available for matching during one run. An entry
/// leaves the pool as soon as it is matched, so no entry matches twice.
#[derive(Debug, Clone, Default)]
pub struct LedgerPool {
    entries: Vec<LedgerEntry>,
}

impl LedgerPool {
    pub fn new(entries: Vec<LedgerEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    fn take(&mut self, index: usize) -> LedgerEntry {
        self.entries.remove(index)
    }
}

/// Best candidate for a transaction under the highest-priority rule that
/// produced one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate {
    pub index: usize,
    pub ledger_id: i64,
    pub rule: MatchRule,
    pub confidence: f32,
    pub date_distance: i64,
}

impl MatchCandidate {
    /// Higher confidence first, then closer date, then lower ledger id.
    /// Document and exact-amount confidences are fixed or fall with date
    /// distance, so for them this is the closest-date order. Fuzzy scores
    /// also weigh the description, and a better description can outrank a
    /// closer date.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .confidence
            .total_cmp(&self.confidence)
            .then(self.date_distance.cmp(&other.date_distance))
            .then(self.ledger_id.cmp(&other.ledger_id))
    }
}

#[derive(Debug, Clone)]
pub struct Matcher {
    pub date_tolerance_days: i64,
    pub fuzzy_window_days: i64,
    pub amount_tolerance_cents: i64,
    pub amount_tolerance_ratio: f64,
    pub fuzzy_threshold: f32,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(&MatchingConfig::default())
    }
}

impl Matcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            date_tolerance_days: config.date_tolerance_days,
            fuzzy_window_days: config.fuzzy_window_days,
            amount_tolerance_cents: config.amount_tolerance_cents,
            amount_tolerance_ratio: config.amount_tolerance_ratio,
            fuzzy_threshold: config.fuzzy_threshold,
        }
    }

    /// Searches the pool rule by rule; the first rule with any candidate
    /// decides.
    pub fn best_match(&self, tx: &BankTransaction, pool: &LedgerPool) -> Option<MatchCandidate> {
        [MatchRule::DocumentId, MatchRule::AmountDate, MatchRule::Fuzzy]
            .into_iter()
            .find_map(|rule| {
                pool.entries
                    .iter()
                    .enumerate()
                    .filter_map(|(index, entry)| {
                        let confidence = self.score(rule, tx, entry)?;
                        Some(MatchCandidate {
                            index,
                            ledger_id: entry.id,
                            rule,
                            confidence,
                            date_distance: days_between(tx.date(), entry.date),
                        })
                    })
                    .min_by(MatchCandidate::rank)
            })
    }

    /// Like [`Matcher::best_match`], but removes the matched entry from the
    /// pool.
    pub fn take_match(
        &self,
        tx: &BankTransaction,
        pool: &mut LedgerPool,
    ) -> Option<(LedgerEntry, MatchRule, f32)> {
        let candidate = self.best_match(tx, pool)?;
        let entry = pool.take(candidate.index);
        Some((entry, candidate.rule, candidate.confidence))
    }

    /// Confidence of `entry` for `tx` under `rule`, or `None` if the rule
    /// does not apply.
    fn score(&self, rule: MatchRule, tx: &BankTransaction, entry: &LedgerEntry) -> Option<f32> {
        match rule {
            MatchRule::DocumentId => {
                let entry_doc = entry.normalized_document()?;
                let matches = |raw: &str| {
                    let doc = normalize_document_number(raw);
                    !doc.is_empty() && doc == entry_doc
                };
                (matches(tx.external_id()) || tx.document_number().is_some_and(matches))
                    .then_some(1.0)
            }
            MatchRule::AmountDate => {
                let days = days_between(tx.date(), entry.date);
                (tx.amount() == entry.amount && days <= self.date_tolerance_days)
                    .then(|| 1.0 - 0.05 * days as f32)
            }
            MatchRule::Fuzzy => {
                let diff = (tx.amount() - entry.amount).abs();
                if diff.to_cents() > self.amount_tolerance(tx.amount()) {
                    return None;
                }
                let days = days_between(tx.date(), entry.date);
                if days > self.fuzzy_window_days {
                    return None;
                }
                let date_score = 1.0 - days as f32 / (self.fuzzy_window_days + 1) as f32;
                let desc_score = description_similarity(tx.description(), &entry.description)
                    .max(keyword_overlap(tx.description(), &entry.searchable_text()));
                let confidence = (date_score + desc_score) / 2.0;
                (confidence >= self.fuzzy_threshold).then_some(confidence)
            }
        }
    }

    /// Allowed amount difference in cents: the absolute tolerance or the
    /// relative one, whichever is larger.
    fn amount_tolerance(&self, amount: Money) -> i64 {
        let relative = (amount.abs().to_cents() as f64 * self.amount_tolerance_ratio).round() as i64;
        self.amount_tolerance_cents.max(relative)
    }
}

/// Positions of transactions repeating the external id, amount and date of an
/// earlier transaction in the same statement.
pub fn duplicate_positions(transactions: &[BankTransaction]) -> HashSet<usize> {
    let mut seen: HashSet<(&str, Money, NaiveDate)> = HashSet::new();
    let mut duplicates = HashSet::new();
    for (i, tx) in transactions.iter().enumerate() {
        if !seen.insert((tx.external_id(), tx.amount(), tx.date())) {
            duplicates.insert(i);
        }
    }
    duplicates
}
