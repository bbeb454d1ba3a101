use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::{ErpAccountId, LedgerEntry};
use crate::transaction::CategorizedTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Created,
    Unmatched,
    Ambiguous,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Matched => write!(f, "matched"),
            MatchStatus::Created => write!(f, "created"),
            MatchStatus::Unmatched => write!(f, "unmatched"),
            MatchStatus::Ambiguous => write!(f, "ambiguous"),
        }
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matched" => Ok(MatchStatus::Matched),
            "created" => Ok(MatchStatus::Created),
            "unmatched" => Ok(MatchStatus::Unmatched),
            "ambiguous" => Ok(MatchStatus::Ambiguous),
            other => Err(format!("Unknown match status: '{other}'")),
        }
    }
}

/// Matching rules, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Bank external id equals the ERP document number.
    DocumentId,
    /// Same amount, dates within the tolerance window.
    AmountDate,
    /// Close amount and date with similar descriptions.
    Fuzzy,
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchRule::DocumentId => write!(f, "document_id"),
            MatchRule::AmountDate => write!(f, "amount_date"),
            MatchRule::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// One per transaction per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub transaction: CategorizedTransaction,
    pub ledger_entry: Option<LedgerEntry>,
    pub match_confidence: f32,
    pub status: MatchStatus,
    pub rule: Option<MatchRule>,
    /// Why the transaction ended up unmatched or ambiguous, if there is more
    /// to say than the status.
    pub note: Option<String>,
}

impl MatchResult {
    pub fn matched(
        transaction: CategorizedTransaction,
        entry: LedgerEntry,
        rule: MatchRule,
        confidence: f32,
    ) -> Self {
        MatchResult {
            transaction,
            ledger_entry: Some(entry),
            match_confidence: confidence.clamp(0.0, 1.0),
            status: MatchStatus::Matched,
            rule: Some(rule),
            note: None,
        }
    }

    pub fn created(transaction: CategorizedTransaction, entry: LedgerEntry) -> Self {
        let confidence = transaction.confidence_score();
        MatchResult {
            transaction,
            ledger_entry: Some(entry),
            match_confidence: confidence,
            status: MatchStatus::Created,
            rule: None,
            note: None,
        }
    }

    pub fn unmatched(transaction: CategorizedTransaction, note: Option<String>) -> Self {
        MatchResult {
            transaction,
            ledger_entry: None,
            match_confidence: 0.0,
            status: MatchStatus::Unmatched,
            rule: None,
            note,
        }
    }

    pub fn ambiguous(transaction: CategorizedTransaction, note: impl Into<String>) -> Self {
        MatchResult {
            transaction,
            ledger_entry: None,
            match_confidence: 0.0,
            status: MatchStatus::Ambiguous,
            rule: None,
            note: Some(note.into()),
        }
    }

    pub fn ledger_entry_id(&self) -> Option<i64> {
        self.ledger_entry.as_ref().map(|e| e.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub account_id: ErpAccountId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub matched: usize,
    pub created: usize,
    pub unmatched: usize,
    pub ambiguous: usize,
    pub results: Vec<MatchResult>,
}

impl ReconciliationReport {
    pub fn new(
        account_id: ErpAccountId,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<MatchResult>,
    ) -> Self {
        let count = |status: MatchStatus| results.iter().filter(|r| r.status == status).count();
        ReconciliationReport {
            account_id,
            started_at,
            finished_at,
            matched: count(MatchStatus::Matched),
            created: count(MatchStatus::Created),
            unmatched: count(MatchStatus::Unmatched),
            ambiguous: count(MatchStatus::Ambiguous),
            results,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Account {}: {} transactions, {} matched, {} created, {} unmatched, {} ambiguous",
            self.account_id,
            self.total(),
            self.matched,
            self.created,
            self.unmatched,
            self.ambiguous
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::transaction::{BankTransaction, Prediction};
    use chrono::NaiveDate;

    fn categorized(id: &str) -> CategorizedTransaction {
        CategorizedTransaction {
            transaction: BankTransaction::new(
                NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                Money::from_cents(100),
                "x",
                id,
            )
            .unwrap(),
            prediction: Prediction::fallback("Outros"),
            predicted_client: None,
        }
    }

    #[test]
    fn report_counts_each_status() {
        let now = Utc::now();
        let results = vec![
            MatchResult::unmatched(categorized("A"), None),
            MatchResult::ambiguous(categorized("A"), "duplicate"),
            MatchResult::unmatched(categorized("B"), Some("ERP write failed".into())),
        ];
        let report = ReconciliationReport::new(ErpAccountId(1), now, now, results);
        assert_eq!(report.total(), 3);
        assert_eq!(report.unmatched, 2);
        assert_eq!(report.ambiguous, 1);
        assert_eq!(report.matched + report.created, 0);
        assert!(report.summary().contains("3 transactions"));
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            MatchStatus::Matched,
            MatchStatus::Created,
            MatchStatus::Unmatched,
            MatchStatus::Ambiguous,
        ] {
            assert_eq!(status.to_string().parse::<MatchStatus>().unwrap(), status);
        }
    }

    #[test]
    fn rules_order_by_priority() {
        assert!(MatchRule::DocumentId < MatchRule::AmountDate);
        assert!(MatchRule::AmountDate < MatchRule::Fuzzy);
    }
}
