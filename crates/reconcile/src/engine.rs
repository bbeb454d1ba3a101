use caixa_categorize::Categorizer;
use caixa_core::text::fold_accents;
use caixa_core::{
    CategorizedTransaction, ErpAccountId, LedgerEntry, MatchResult, NewLedgerEntry, Prediction,
    ReconciliationReport, TtlCache,
};
use caixa_erp::{ErpCategory, ErpClient};
use caixa_import::Statement;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::MatchingConfig;
use crate::error::ReconcileError;
use crate::learning::{self, LearningOutcome};
use crate::matcher::{duplicate_positions, LedgerPool, Matcher};

pub const DRY_RUN_NOTE: &str = "dry run: would create";
pub const DUPLICATE_NOTE: &str = "duplicate of an earlier transaction in this statement";

/// Reconciles bank statements against one ERP. The engine owns its ERP
/// client; the categorizer may be shared with other engines.
pub struct ReconciliationEngine<C> {
    erp: C,
    categorizer: Arc<Categorizer>,
    matcher: Matcher,
    config: MatchingConfig,
    categories: Mutex<TtlCache<Vec<ErpCategory>>>,
}

impl<C: ErpClient> ReconciliationEngine<C> {
    pub fn new(
        erp: C,
        categorizer: Arc<Categorizer>,
        config: MatchingConfig,
        category_cache_ttl: chrono::Duration,
    ) -> Self {
        Self {
            erp,
            categorizer,
            matcher: Matcher::new(&config),
            config,
            categories: Mutex::new(TtlCache::new(category_cache_ttl)),
        }
    }

    pub fn erp(&self) -> &C {
        &self.erp
    }

    pub fn erp_mut(&mut self) -> &mut C {
        &mut self.erp
    }

    pub fn categorizer(&self) -> &Arc<Categorizer> {
        &self.categorizer
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Parses an OFX file and reconciles it.
    pub async fn reconcile_file(
        &mut self,
        account: ErpAccountId,
        path: &Path,
    ) -> Result<(Statement, ReconciliationReport), ReconcileError> {
        let statement = caixa_import::import::import_ofx_file(path)?;
        let report = self.reconcile(account, &statement).await?;
        Ok((statement, report))
    }

    /// Matches every statement transaction against the ERP ledger, creating
    /// entries for confidently categorized leftovers.
    ///
    /// Fails only if the ledger cannot be fetched; nothing is written in that
    /// case.
    pub async fn reconcile(
        &mut self,
        account: ErpAccountId,
        statement: &Statement,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let started_at = Utc::now();
        let mut pool = LedgerPool::new(self.fetch_ledger(account, statement).await?);
        let duplicates = duplicate_positions(&statement.transactions);

        info!(
            account = %account,
            transactions = statement.transactions.len(),
            ledger_entries = pool.len(),
            dry_run = self.config.dry_run,
            "Starting reconciliation"
        );

        let mut results = Vec::with_capacity(statement.transactions.len());

        for (position, tx) in statement.transactions.iter().enumerate() {
            let categorized = self.categorizer.categorize(tx.clone());

            if duplicates.contains(&position) {
                debug!(external_id = tx.external_id(), "Duplicate transaction in statement");
                results.push(MatchResult::ambiguous(categorized, DUPLICATE_NOTE));
                continue;
            }

            if let Some((entry, rule, confidence)) = self.matcher.take_match(tx, &mut pool) {
                debug!(
                    external_id = tx.external_id(),
                    ledger_id = entry.id,
                    rule = %rule,
                    confidence,
                    "Matched transaction"
                );
                results.push(MatchResult::matched(categorized, entry, rule, confidence));
                continue;
            }

            results.push(self.create_or_leave(account, categorized).await);
        }

        let report = ReconciliationReport::new(account, started_at, Utc::now(), results);
        if self.config.learn_from_created {
            self.categorizer.train(&learning::created_examples(&report));
        }
        info!(
            account = %account,
            matched = report.matched,
            created = report.created,
            unmatched = report.unmatched,
            ambiguous = report.ambiguous,
            "{}",
            report.summary()
        );
        Ok(report)
    }

    /// Replays a statement against already reconciled ERP entries and trains
    /// the categorizer from the pairs found.
    pub async fn replay(
        &mut self,
        account: ErpAccountId,
        statement: &Statement,
    ) -> Result<LearningOutcome, ReconcileError> {
        let entries = self.fetch_ledger(account, statement).await?;
        let outcome = learning::learn_from_history(&self.matcher, statement, entries);
        self.categorizer.train(&outcome.examples);
        Ok(outcome)
    }

    async fn fetch_ledger(
        &mut self,
        account: ErpAccountId,
        statement: &Statement,
    ) -> Result<Vec<LedgerEntry>, ReconcileError> {
        self.erp.set_account_id(account).await?;
        let window = statement.period.widen(self.config.window_margin_days);
        let entries = self.erp.list_ledger_entries(account, window).await?;
        debug!(account = %account, window = %window, count = entries.len(), "Fetched ledger entries");
        Ok(entries)
    }

    async fn create_or_leave(
        &mut self,
        account: ErpAccountId,
        categorized: CategorizedTransaction,
    ) -> MatchResult {
        let confidence = match categorized.prediction {
            Prediction::Predicted { confidence, .. } if confidence >= self.config.create_threshold => {
                confidence
            }
            Prediction::Predicted { confidence, .. } => {
                let note = format!(
                    "confidence {confidence:.2} below create threshold {:.2}",
                    self.config.create_threshold
                );
                return MatchResult::unmatched(categorized, Some(note));
            }
            Prediction::Fallback { .. } => {
                return MatchResult::unmatched(categorized, Some("no model prediction".into()));
            }
        };

        if self.config.dry_run {
            return MatchResult::unmatched(categorized, Some(DRY_RUN_NOTE.into()));
        }

        let code = self.category_code(categorized.predicted_category()).await;
        let request = NewLedgerEntry::from_categorized(account, &categorized, code);
        match self.erp.create_ledger_entry(&request).await {
            Ok(entry) => {
                debug!(
                    external_id = categorized.transaction.external_id(),
                    ledger_id = entry.id,
                    confidence,
                    "Created ledger entry"
                );
                MatchResult::created(categorized, entry)
            }
            Err(e) => {
                warn!(
                    external_id = categorized.transaction.external_id(),
                    error = %e,
                    "Failed to create ledger entry"
                );
                MatchResult::unmatched(categorized, Some(format!("ERP write failed: {e}")))
            }
        }
    }

    /// ERP code for a category name: exact description match first, then
    /// containment. Falls back to the name itself when the ERP has no match or
    /// its category list is unavailable.
    async fn category_code(&self, name: &str) -> String {
        let mut cache = self.categories.lock().await;
        let erp = &self.erp;
        match cache.get_or_refresh(Utc::now(), || erp.list_categories()).await {
            Ok(categories) => resolve_category(categories, name).unwrap_or_else(|| name.to_string()),
            Err(e) => {
                warn!(error = %e, "ERP categories unavailable, sending category name");
                name.to_string()
            }
        }
    }
}

fn resolve_category(categories: &[ErpCategory], name: &str) -> Option<String> {
    let wanted = fold_accents(name.trim()).to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    let folded: Vec<(String, &ErpCategory)> = categories
        .iter()
        .map(|c| (fold_accents(c.description.trim()).to_lowercase(), c))
        .collect();

    folded
        .iter()
        .find(|(desc, _)| *desc == wanted)
        .or_else(|| {
            folded
                .iter()
                .find(|(desc, _)| !desc.is_empty() && (desc.contains(&wanted) || wanted.contains(desc.as_str())))
        })
        .map(|(_, c)| c.code.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(code: &str, description: &str) -> ErpCategory {
        ErpCategory {
            code: code.into(),
            description: description.into(),
        }
    }

    #[test]
    fn resolves_exact_before_containment() {
        let categories = vec![
            category("2.01.01", "Energia Elétrica e Água"),
            category("2.01.02", "Energia"),
        ];
        assert_eq!(resolve_category(&categories, "energia").as_deref(), Some("2.01.02"));
    }

    #[test]
    fn resolves_by_containment_and_accents() {
        let categories = vec![
            category("1.01.01", "Receita de Vendas"),
            category("2.03.04", "Tarifas Bancarias"),
        ];
        assert_eq!(resolve_category(&categories, "Vendas").as_deref(), Some("1.01.01"));
        assert_eq!(resolve_category(&categories, "Tarifas Bancárias").as_deref(), Some("2.03.04"));
        assert_eq!(resolve_category(&categories, "Aluguel"), None);
        assert_eq!(resolve_category(&categories, "  "), None);
    }
}
