use anyhow::{Context, Result};
use caixa_categorize::{Categorizer, CategoryRuleEngine};
use caixa_core::{ErpAccountId, MatchStatus, ReconciliationReport};
use caixa_erp::{ErpClient, OmieClient};
use caixa_import::Statement;
use caixa_reconcile::{dedupe_by_external_id, learning, Config, ReconciliationEngine};
use caixa_storage::DbPool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub async fn reconcile(
    config: &Config,
    account: Option<i64>,
    file: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let statement = caixa_import::import::import_ofx(&data)
        .with_context(|| format!("parsing {}", file.display()))?;
    let fingerprint = caixa_storage::statement_fingerprint(&data);

    let report = run_reconcile(
        config,
        omie_client(config)?,
        account,
        &statement,
        &fingerprint,
        dry_run,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Reconciles, records the run and keeps what the run taught the model, both
/// in the saved model and in the learning data `rebuild` starts from.
async fn run_reconcile<C: ErpClient>(
    config: &Config,
    erp: C,
    account: Option<i64>,
    statement: &Statement,
    fingerprint: &str,
    dry_run: bool,
) -> Result<ReconciliationReport> {
    let account = target_account(config, account, statement)?;
    let categorizer = Arc::new(load_categorizer(config)?);
    let mut matching = config.matching.clone();
    matching.dry_run |= dry_run;
    let dry_run = matching.dry_run;

    let mut engine = ReconciliationEngine::new(
        erp,
        Arc::clone(&categorizer),
        matching,
        config.erp.category_cache_ttl(),
    );
    let report = engine.reconcile(account, statement).await?;

    let db = open_db(config).await?;
    let run_id = caixa_storage::save_run_report(&db, &report, Some(fingerprint), dry_run)
        .await
        .context("saving run report")?;
    tracing::info!(run_id = %run_id, "Run recorded");

    if config.matching.learn_from_created {
        let examples = learning::created_examples(&report);
        if !examples.is_empty() {
            let stored = learning::persist_examples(&db, &examples, "created").await?;
            tracing::info!(stored, "Stored examples from created entries");
            save_model(config, &categorizer)?;
        }
    }
    Ok(report)
}

/// `--account` wins; otherwise the `[[accounts]]` table decides.
fn target_account(config: &Config, explicit: Option<i64>, statement: &Statement) -> Result<ErpAccountId> {
    if let Some(id) = explicit {
        return Ok(ErpAccountId(id));
    }
    let account = &statement.account;
    config.resolve_account(account).with_context(|| {
        format!(
            "no [[accounts]] entry matches statement account {} ({:?}); pass --account",
            account.account_id, account.kind
        )
    })
}

pub async fn learn(
    config: &Config,
    account: Option<i64>,
    files: &[PathBuf],
    dedupe: bool,
) -> Result<()> {
    let categorizer = Arc::new(load_categorizer(config)?);
    let mut engine = ReconciliationEngine::new(
        omie_client(config)?,
        Arc::clone(&categorizer),
        config.matching.clone(),
        config.erp.category_cache_ttl(),
    );
    let db = open_db(config).await?;
    let mut seen: HashSet<String> = HashSet::new();

    for file in files {
        let mut statement = caixa_import::import::import_ofx_file(file)
            .with_context(|| format!("parsing {}", file.display()))?;
        let target = target_account(config, account, &statement)
            .with_context(|| format!("choosing the ERP account for {}", file.display()))?;
        if dedupe {
            statement.transactions = dedupe_by_external_id(&statement.transactions)
                .into_iter()
                .filter(|tx| seen.insert(tx.external_id().to_string()))
                .collect();
        }

        let outcome = engine.replay(target, &statement).await?;
        let stored = learning::persist(&db, &outcome, "replay").await?;
        println!(
            "{}: {} transactions, {} matched ({:.0}%), {} examples stored",
            file.display(),
            outcome.transactions,
            outcome.matches_found,
            outcome.learning_rate * 100.0,
            stored
        );
    }

    save_model(config, &categorizer)
}

pub async fn stats(config: &Config, runs: u32) -> Result<()> {
    let categorizer = load_categorizer(config)?;
    let model = categorizer.stats();
    println!(
        "Model: {} examples, {} categories, {} clients ({})",
        model.examples_seen,
        model.categories,
        model.clients,
        if model.trained { "trained" } else { "using rules only" }
    );

    let db = open_db(config).await?;
    let learning = caixa_storage::learning_stats(&db).await?;
    println!(
        "Learning data: {} examples, {} categories, {} clients",
        learning.examples, learning.categories, learning.clients
    );

    let recent = caixa_storage::list_runs(&db, runs).await?;
    if recent.is_empty() {
        println!("No reconciliation runs yet");
    }
    for run in recent {
        println!(
            "{}  account {}  matched {}  created {}  unmatched {}  ambiguous {}{}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.account_id,
            run.matched,
            run.created,
            run.unmatched,
            run.ambiguous,
            if run.dry_run { "  (dry run)" } else { "" }
        );
    }
    Ok(())
}

pub async fn rebuild(config: &Config) -> Result<()> {
    let categorizer = Categorizer::new(config.categorizer.categorizer_config(), load_rules(config)?);
    let db = open_db(config).await?;
    let used = learning::restore(&db, &categorizer).await?;
    println!("Retrained on {used} stored examples");
    save_model(config, &categorizer)
}

fn load_rules(config: &Config) -> Result<CategoryRuleEngine> {
    match &config.categorizer.rules_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            CategoryRuleEngine::from_toml(&content)
                .with_context(|| format!("loading rules from {}", path.display()))
        }
        None => CategoryRuleEngine::builtin().context("loading built-in rules"),
    }
}

fn load_categorizer(config: &Config) -> Result<Categorizer> {
    Ok(Categorizer::load_or_fallback(
        &config.categorizer.model_path,
        config.categorizer.categorizer_config(),
        load_rules(config)?,
    ))
}

fn save_model(config: &Config, categorizer: &Categorizer) -> Result<()> {
    let path = &config.categorizer.model_path;
    categorizer
        .save(path)
        .with_context(|| format!("saving model to {}", path.display()))
}

fn omie_client(config: &Config) -> Result<OmieClient> {
    let omie = config.erp.omie_config()?;
    Ok(OmieClient::new(omie)?)
}

async fn open_db(config: &Config) -> Result<DbPool> {
    let path = &config.storage.database_path;
    caixa_storage::create_db(path)
        .await
        .with_context(|| format!("opening {}", path.display()))
}

fn print_report(report: &ReconciliationReport) {
    for result in &report.results {
        let tx = &result.transaction.transaction;
        let target = match (&result.ledger_entry, &result.note) {
            (Some(entry), _) => format!("-> #{}", entry.id),
            (None, Some(note)) => format!("({note})"),
            (None, None) => String::new(),
        };
        let status = match result.status {
            MatchStatus::Matched => "MATCHED",
            MatchStatus::Created => "CREATED",
            MatchStatus::Unmatched => "UNMATCHED",
            MatchStatus::Ambiguous => "AMBIGUOUS",
        };
        println!(
            "{:<10} {}  {:>14}  {:<40}  {} {}",
            status,
            tx.date(),
            tx.amount().to_string(),
            truncate(tx.description(), 40),
            result.transaction.predicted_category(),
            target
        );
    }
    println!("{}", report.summary());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}…")
    }
}
