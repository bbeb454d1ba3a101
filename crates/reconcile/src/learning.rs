//! Learning from past reconciliations.
//!
//! A statement that was already reconciled in the ERP is replayed against the
//! ERP's reconciled entries; every pair the matcher finds becomes a training
//! example labelled with the category and client the ERP holds.

use caixa_categorize::Categorizer;
use caixa_core::text::fold_accents;
use caixa_core::{
    BankTransaction, CategorizedTransaction, LedgerEntry, LedgerStatus, MatchStatus,
    ReconciliationReport, TrainingExample, TransactionFeatures,
};
use caixa_import::Statement;
use caixa_storage::{DbPool, StorageError};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::matcher::{LedgerPool, Matcher};

/// Labels that carry no information; compared case- and accent-insensitively.
/// "PIX" is the client stand-in for transfers whose payer name is unreadable.
const PLACEHOLDER_LABELS: &[&str] = &["", "nao categorizado", "outros", "saldo anterior", "pix"];

pub fn is_placeholder(label: &str) -> bool {
    let folded = fold_accents(label.trim()).to_lowercase();
    PLACEHOLDER_LABELS.contains(&folded.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningOutcome {
    pub transactions: usize,
    pub matches_found: usize,
    pub examples: Vec<TrainingExample>,
    /// Share of transactions that matched a reconciled entry.
    pub learning_rate: f64,
}

/// Matches `statement` against `entries` (only reconciled ones count) and
/// derives an example from each pair with a meaningful label.
pub fn learn_from_history(
    matcher: &Matcher,
    statement: &Statement,
    entries: Vec<LedgerEntry>,
) -> LearningOutcome {
    let reconciled: Vec<LedgerEntry> = entries
        .into_iter()
        .filter(|e| e.status == LedgerStatus::Reconciled)
        .collect();
    let mut pool = LedgerPool::new(reconciled);

    let mut matches_found = 0;
    let mut examples = Vec::new();
    for tx in &statement.transactions {
        let Some((entry, rule, _)) = matcher.take_match(tx, &mut pool) else {
            continue;
        };
        matches_found += 1;
        debug!(external_id = tx.external_id(), ledger_id = entry.id, rule = %rule, "Historical match");
        if let Some(example) = example_from_pair(tx, &entry) {
            examples.push(example);
        }
    }

    let transactions = statement.transactions.len();
    let learning_rate = if transactions == 0 {
        0.0
    } else {
        matches_found as f64 / transactions as f64
    };
    info!(
        transactions,
        matches_found,
        examples = examples.len(),
        "Replayed statement against reconciled entries"
    );

    LearningOutcome {
        transactions,
        matches_found,
        examples,
        learning_rate,
    }
}

fn meaningful(label: Option<&str>) -> Option<String> {
    label.filter(|l| !is_placeholder(l)).map(str::to_string)
}

fn example_from_pair(tx: &BankTransaction, entry: &LedgerEntry) -> Option<TrainingExample> {
    TrainingExample::new(
        TransactionFeatures::from_transaction(tx),
        meaningful(entry.category.as_deref()),
        meaningful(entry.client.as_deref()),
    )
    .ok()
}

/// Examples from the entries a run created, labelled with the predicted
/// category name (not the ERP code) and client.
pub fn created_examples(report: &ReconciliationReport) -> Vec<TrainingExample> {
    report
        .results
        .iter()
        .filter(|r| r.status == MatchStatus::Created)
        .filter_map(|r| created_example(&r.transaction))
        .collect()
}

fn created_example(categorized: &CategorizedTransaction) -> Option<TrainingExample> {
    TrainingExample::new(
        TransactionFeatures::from_transaction(&categorized.transaction),
        meaningful(Some(categorized.predicted_category())),
        meaningful(categorized.predicted_client.as_deref()),
    )
    .ok()
}

/// First occurrence of each external id, in order. Replays are additive, so
/// callers replaying overlapping statements can use this to avoid counting a
/// transaction twice.
pub fn dedupe_by_external_id(transactions: &[BankTransaction]) -> Vec<BankTransaction> {
    let mut seen = HashSet::new();
    transactions
        .iter()
        .filter(|tx| seen.insert(tx.external_id().to_string()))
        .cloned()
        .collect()
}

/// Stores the outcome's examples so the model can be rebuilt later.
pub async fn persist(
    pool: &DbPool,
    outcome: &LearningOutcome,
    source: &str,
) -> Result<u64, ReconcileError> {
    persist_examples(pool, &outcome.examples, source).await
}

pub async fn persist_examples(
    pool: &DbPool,
    examples: &[TrainingExample],
    source: &str,
) -> Result<u64, ReconcileError> {
    if examples.is_empty() {
        return Ok(0);
    }
    let written = caixa_storage::insert_training_examples(pool, examples, source)
        .await
        .map_err(StorageError::from)?;
    Ok(written)
}

/// Trains `categorizer` on every stored example. Returns how many were used.
pub async fn restore(pool: &DbPool, categorizer: &Categorizer) -> Result<usize, ReconcileError> {
    let examples = caixa_storage::load_training_examples(pool).await?;
    Ok(categorizer.train(&examples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use caixa_core::{DateRange, ErpAccountId, Money};
    use caixa_import::{AccountKind, StatementAccount};
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn tx(id: &str, day: u32, desc: &str, cents: i64) -> BankTransaction {
        BankTransaction::new(d(day), Money::from_cents(cents), desc, id).unwrap()
    }

    fn entry(id: i64, day: u32, cents: i64, category: &str, status: LedgerStatus) -> LedgerEntry {
        LedgerEntry {
            id,
            date: d(day),
            amount: Money::from_cents(cents),
            account_id: ErpAccountId(1),
            category: Some(category.into()),
            client: None,
            document_number: None,
            description: "lançamento".into(),
            status,
        }
    }

    fn statement(transactions: Vec<BankTransaction>) -> Statement {
        Statement {
            account: StatementAccount {
                account_id: "12345-6".into(),
                bank_id: None,
                kind: AccountKind::Checking,
            },
            period: DateRange::new(d(1), d(31)),
            transactions,
            currency: Some("BRL".into()),
            ledger_balance: None,
        }
    }

    #[test]
    fn placeholders_are_case_and_accent_insensitive() {
        for label in ["", "  ", "Não Categorizado", "OUTROS", "Saldo Anterior", "pix"] {
            assert!(is_placeholder(label), "{label:?}");
        }
        assert!(!is_placeholder("Energia"));
    }

    #[test]
    fn learns_only_from_reconciled_meaningful_pairs() {
        let st = statement(vec![
            tx("A", 5, "CEMIG ENERGIA", -20000),
            tx("B", 6, "ALUGUEL", -150000),
            tx("C", 7, "PIX RECEBIDO", 5000),
            tx("D", 8, "SEM PAR", 777),
        ]);
        let entries = vec![
            entry(1, 5, -20000, "Energia", LedgerStatus::Reconciled),
            entry(2, 6, -150000, "Aluguel", LedgerStatus::Open),
            entry(3, 7, 5000, "Outros", LedgerStatus::Reconciled),
        ];

        let outcome = learn_from_history(&Matcher::default(), &st, entries);
        assert_eq!(outcome.transactions, 4);
        assert_eq!(outcome.matches_found, 2);
        assert_eq!(outcome.examples.len(), 1);
        assert_eq!(outcome.examples[0].category(), Some("Energia"));
        assert_eq!(outcome.examples[0].features().description, "CEMIG ENERGIA");
        assert!((outcome.learning_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn client_alone_is_enough() {
        let mut e = entry(1, 5, 5000, "Não Categorizado", LedgerStatus::Reconciled);
        e.client = Some("Maria da Silva".into());
        let outcome = learn_from_history(&Matcher::default(), &statement(vec![tx("A", 5, "PIX", 5000)]), vec![e]);
        assert_eq!(outcome.examples.len(), 1);
        assert_eq!(outcome.examples[0].category(), None);
        assert_eq!(outcome.examples[0].client(), Some("Maria da Silva"));
    }

    #[test]
    fn empty_statement_has_zero_rate() {
        let outcome = learn_from_history(&Matcher::default(), &statement(Vec::new()), Vec::new());
        assert_eq!(outcome.learning_rate, 0.0);
        assert!(outcome.examples.is_empty());
    }

    fn categorized(desc: &str, cents: i64, category: &str, client: Option<&str>) -> CategorizedTransaction {
        CategorizedTransaction {
            transaction: tx("N", 9, desc, cents),
            prediction: caixa_core::Prediction::predicted(category, 0.9).unwrap(),
            predicted_client: client.map(str::to_string),
        }
    }

    #[test]
    fn created_examples_drop_placeholder_clients() {
        let created = entry(50, 9, 15000, "Vendas", LedgerStatus::Open);
        let report = ReconciliationReport::new(
            ErpAccountId(1),
            chrono::Utc::now(),
            chrono::Utc::now(),
            vec![
                caixa_core::MatchResult::created(
                    categorized("PIX RECEBIDO 12345", 15000, "Vendas", Some("PIX")),
                    created.clone(),
                ),
                caixa_core::MatchResult::created(
                    categorized("PIX RECEBIDO - MARIA DA SILVA", 9000, "Vendas", Some("Maria Da Silva")),
                    created,
                ),
                caixa_core::MatchResult::unmatched(categorized("ZZZ", 100, "Vendas", None), None),
            ],
        );

        let examples = created_examples(&report);
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].category(), Some("Vendas"));
        assert_eq!(examples[0].client(), None);
        assert_eq!(examples[1].client(), Some("Maria Da Silva"));
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let txs = vec![tx("A", 1, "x", 1), tx("B", 2, "y", 2), tx("A", 3, "z", 3)];
        let unique = dedupe_by_external_id(&txs);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].description(), "x");
        assert_eq!(unique[1].external_id(), "B");
    }

    #[tokio::test]
    async fn persisted_examples_restore_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let db = caixa_storage::create_db(&dir.path().join("caixa.db")).await.unwrap();
        let st = statement(vec![tx("A", 5, "CEMIG ENERGIA", -20000)]);
        let outcome = learn_from_history(
            &Matcher::default(),
            &st,
            vec![entry(1, 5, -20000, "Energia", LedgerStatus::Reconciled)],
        );
        assert_eq!(persist(&db, &outcome, "replay").await.unwrap(), 1);

        let categorizer = Categorizer::new(Default::default(), caixa_categorize::CategoryRuleEngine::builtin().unwrap());
        assert_eq!(restore(&db, &categorizer).await.unwrap(), 1);
        assert_eq!(categorizer.stats().examples_seen, 1);
    }
}
