use caixa_core::{
    ErpAccountId, MatchStatus, Money, ReconciliationReport, TrainingExample, TransactionFeatures,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use thiserror::Error;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learning_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            category TEXT,
            client TEXT,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliation_runs (
            id TEXT PRIMARY KEY,
            account_id INTEGER NOT NULL,
            statement_sha256 TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            dry_run INTEGER NOT NULL DEFAULT 0,
            matched INTEGER NOT NULL,
            created INTEGER NOT NULL,
            unmatched INTEGER NOT NULL,
            ambiguous INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliation_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            external_id TEXT NOT NULL,
            date TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            confidence REAL NOT NULL,
            status TEXT NOT NULL,
            rule TEXT,
            ledger_entry_id INTEGER,
            note TEXT,
            FOREIGN KEY (run_id) REFERENCES reconciliation_runs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_results_run ON reconciliation_results(run_id, position)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Hex SHA-256 of a statement file, used to spot re-imports of the same file.
pub fn statement_fingerprint(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ── Learning data ────────────────────────────────────────────────────────────

/// Appends examples in one transaction. `source` tags where they came from
/// (`"replay"`, `"created"`, ...). Returns the number of rows written.
pub async fn insert_training_examples(
    pool: &DbPool,
    examples: &[TrainingExample],
    source: &str,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    for example in examples {
        let features = example.features();
        sqlx::query(
            "INSERT INTO learning_data (description, amount_cents, category, client, source) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&features.description)
        .bind(features.amount.to_cents())
        .bind(example.category())
        .bind(example.client())
        .bind(source)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(examples.len() as u64)
}

/// All stored examples, oldest first.
pub async fn load_training_examples(pool: &DbPool) -> Result<Vec<TrainingExample>, StorageError> {
    let rows = sqlx::query_as::<_, (String, i64, Option<String>, Option<String>)>(
        "SELECT description, amount_cents, category, client FROM learning_data ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(description, cents, category, client)| {
            let features = TransactionFeatures::new(description, Money::from_cents(cents));
            TrainingExample::new(features, category, client).map_err(|e| StorageError::Corrupt {
                table: "learning_data",
                reason: e.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningStats {
    pub examples: i64,
    pub categories: i64,
    pub clients: i64,
    pub last_recorded_at: Option<String>,
}

pub async fn learning_stats(pool: &DbPool) -> Result<LearningStats, sqlx::Error> {
    let (examples, categories, clients, last_recorded_at) =
        sqlx::query_as::<_, (i64, i64, i64, Option<String>)>(
            "SELECT COUNT(*), COUNT(DISTINCT category), COUNT(DISTINCT client), MAX(created_at) FROM learning_data",
        )
        .fetch_one(pool)
        .await?;

    Ok(LearningStats {
        examples,
        categories,
        clients,
        last_recorded_at,
    })
}

// ── Reconciliation runs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub account_id: ErpAccountId,
    pub statement_sha256: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub matched: i64,
    pub created: i64,
    pub unmatched: i64,
    pub ambiguous: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResultRecord {
    pub external_id: String,
    pub date: NaiveDate,
    pub amount: Money,
    pub description: String,
    pub category: String,
    pub confidence: f64,
    pub status: MatchStatus,
    pub rule: Option<String>,
    pub ledger_entry_id: Option<i64>,
    pub note: Option<String>,
}

/// Stores a finished run and its per-transaction results. Returns the new
/// run id.
pub async fn save_run_report(
    pool: &DbPool,
    report: &ReconciliationReport,
    statement_sha256: Option<&str>,
    dry_run: bool,
) -> Result<String, sqlx::Error> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO reconciliation_runs (id, account_id, statement_sha256, started_at, finished_at, dry_run, matched, created, unmatched, ambiguous) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&run_id)
    .bind(report.account_id.0)
    .bind(statement_sha256)
    .bind(report.started_at)
    .bind(report.finished_at)
    .bind(dry_run)
    .bind(report.matched as i64)
    .bind(report.created as i64)
    .bind(report.unmatched as i64)
    .bind(report.ambiguous as i64)
    .execute(&mut *tx)
    .await?;

    for (position, result) in report.results.iter().enumerate() {
        let bank = &result.transaction.transaction;
        sqlx::query(
            "INSERT INTO reconciliation_results (run_id, position, external_id, date, amount_cents, description, category, confidence, status, rule, ledger_entry_id, note) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run_id)
        .bind(position as i64)
        .bind(bank.external_id())
        .bind(bank.date())
        .bind(bank.amount().to_cents())
        .bind(bank.description())
        .bind(result.transaction.predicted_category())
        .bind(f64::from(result.match_confidence))
        .bind(result.status.to_string())
        .bind(result.rule.map(|r| r.to_string()))
        .bind(result.ledger_entry_id())
        .bind(result.note.as_deref())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::debug!(run_id = %run_id, results = report.total(), "Saved reconciliation run");
    Ok(run_id)
}

type RunRow = (
    String,
    i64,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
    bool,
    i64,
    i64,
    i64,
    i64,
);

/// Most recent runs first.
pub async fn list_runs(pool: &DbPool, limit: u32) -> Result<Vec<RunRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(
        "SELECT id, account_id, statement_sha256, started_at, finished_at, dry_run, matched, created, unmatched, ambiguous FROM reconciliation_runs ORDER BY started_at DESC, rowid DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| RunRecord {
            id: r.0,
            account_id: ErpAccountId(r.1),
            statement_sha256: r.2,
            started_at: r.3,
            finished_at: r.4,
            dry_run: r.5,
            matched: r.6,
            created: r.7,
            unmatched: r.8,
            ambiguous: r.9,
        })
        .collect())
}

type ResultRow = (
    String,
    NaiveDate,
    i64,
    String,
    String,
    f64,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
);

/// Results of one run, in statement order.
pub async fn load_run_results(
    pool: &DbPool,
    run_id: &str,
) -> Result<Vec<RunResultRecord>, StorageError> {
    let rows = sqlx::query_as::<_, ResultRow>(
        "SELECT external_id, date, amount_cents, description, category, confidence, status, rule, ledger_entry_id, note FROM reconciliation_results WHERE run_id = ? ORDER BY position",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let status = r.6.parse::<MatchStatus>().map_err(|reason| StorageError::Corrupt {
                table: "reconciliation_results",
                reason,
            })?;
            Ok(RunResultRecord {
                external_id: r.0,
                date: r.1,
                amount: Money::from_cents(r.2),
                description: r.3,
                category: r.4,
                confidence: r.5,
                status,
                rule: r.7,
                ledger_entry_id: r.8,
                note: r.9,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use caixa_core::{
        BankTransaction, CategorizedTransaction, LedgerEntry, LedgerStatus, MatchResult, MatchRule,
        Prediction,
    };
    use tempfile::TempDir;

    async fn test_db() -> (DbPool, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("caixa.db")).await.unwrap();
        (pool, dir)
    }

    fn example(desc: &str, cents: i64, category: Option<&str>, client: Option<&str>) -> TrainingExample {
        TrainingExample::new(
            TransactionFeatures::new(desc, Money::from_cents(cents)),
            category.map(String::from),
            client.map(String::from),
        )
        .unwrap()
    }

    fn categorized(id: &str, cents: i64) -> CategorizedTransaction {
        CategorizedTransaction {
            transaction: BankTransaction::new(
                NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                Money::from_cents(cents),
                "PIX RECEBIDO - MARIA DA SILVA",
                id,
            )
            .unwrap(),
            prediction: Prediction::predicted("Vendas", 0.9).unwrap(),
            predicted_client: Some("Maria Da Silva".into()),
        }
    }

    #[tokio::test]
    async fn creates_schema_on_fresh_file() {
        let (pool, _dir) = test_db().await;
        let stats = learning_stats(&pool).await.unwrap();
        assert_eq!(stats.examples, 0);
        assert_eq!(stats.last_recorded_at, None);
        assert!(list_runs(&pool, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caixa.db");
        {
            let pool = create_db(&path).await.unwrap();
            insert_training_examples(&pool, &[example("CEMIG", -20000, Some("Energia"), None)], "replay")
                .await
                .unwrap();
            pool.close().await;
        }
        let pool = create_db(&path).await.unwrap();
        assert_eq!(load_training_examples(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn training_examples_roundtrip_in_order() {
        let (pool, _dir) = test_db().await;
        let examples = vec![
            example("CEMIG ENERGIA", -20000, Some("Energia"), None),
            example("PIX RECEBIDO - MARIA", 5000, Some("Vendas"), Some("Maria")),
            example("TED ACME", 10000, None, Some("Acme")),
        ];
        let written = insert_training_examples(&pool, &examples, "replay").await.unwrap();
        assert_eq!(written, 3);

        let loaded = load_training_examples(&pool).await.unwrap();
        assert_eq!(loaded, examples);

        let stats = learning_stats(&pool).await.unwrap();
        assert_eq!(stats.examples, 3);
        assert_eq!(stats.categories, 2);
        assert_eq!(stats.clients, 2);
        assert!(stats.last_recorded_at.is_some());
    }

    #[tokio::test]
    async fn saves_and_lists_runs() {
        let (pool, _dir) = test_db().await;
        let entry = LedgerEntry {
            id: 42,
            date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            amount: Money::from_cents(15000),
            account_id: ErpAccountId(7),
            category: Some("Vendas".into()),
            client: None,
            document_number: None,
            description: "Venda".into(),
            status: LedgerStatus::Open,
        };
        let results = vec![
            MatchResult::matched(categorized("A", 15000), entry, MatchRule::AmountDate, 0.95),
            MatchResult::unmatched(categorized("B", 999), Some("ERP write failed".into())),
        ];
        let now = Utc::now();
        let report = ReconciliationReport::new(ErpAccountId(7), now, now, results);
        let fingerprint = statement_fingerprint(b"OFXHEADER:100");

        let run_id = save_run_report(&pool, &report, Some(&fingerprint), false).await.unwrap();

        let runs = list_runs(&pool, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run_id);
        assert_eq!(runs[0].account_id, ErpAccountId(7));
        assert_eq!(runs[0].matched, 1);
        assert_eq!(runs[0].unmatched, 1);
        assert_eq!(runs[0].statement_sha256.as_deref(), Some(fingerprint.as_str()));
        assert!(!runs[0].dry_run);

        let stored = load_run_results(&pool, &run_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].external_id, "A");
        assert_eq!(stored[0].status, MatchStatus::Matched);
        assert_eq!(stored[0].rule.as_deref(), Some("amount_date"));
        assert_eq!(stored[0].ledger_entry_id, Some(42));
        assert_eq!(stored[1].amount, Money::from_cents(999));
        assert_eq!(stored[1].note.as_deref(), Some("ERP write failed"));
    }

    #[tokio::test]
    async fn list_runs_respects_limit() {
        let (pool, _dir) = test_db().await;
        let now = Utc::now();
        for account in 1..=3 {
            let report = ReconciliationReport::new(ErpAccountId(account), now, now, Vec::new());
            save_run_report(&pool, &report, None, true).await.unwrap();
        }
        let runs = list_runs(&pool, 2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.dry_run));
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = statement_fingerprint(b"abc");
        assert_eq!(a, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_ne!(a, statement_fingerprint(b"abd"));
    }
}
