use async_trait::async_trait;
use caixa_core::{DateRange, ErpAccountId, LedgerEntry, NewLedgerEntry};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::{ErpCategory, ErpClient, ErpError};

/// A deterministic ERP held in memory, with switches to simulate outages.
#[derive(Debug, Default)]
pub struct InMemoryErp {
    entries: Vec<LedgerEntry>,
    categories: Vec<ErpCategory>,
    account: Option<ErpAccountId>,
    created: Vec<NewLedgerEntry>,
    offline: bool,
    reject_all_creates: bool,
    reject_creates_for: BTreeSet<String>,
    category_calls: AtomicUsize,
}

impl InMemoryErp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(mut self, entries: Vec<LedgerEntry>) -> Self {
        self.entries = entries;
        self
    }

    pub fn with_categories(mut self, categories: Vec<ErpCategory>) -> Self {
        self.categories = categories;
        self
    }

    /// Every read fails with a connectivity error while set.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn reject_all_creates(&mut self) {
        self.reject_all_creates = true;
    }

    /// Rejects creation of entries carrying this integration code.
    pub fn reject_create_for(&mut self, integration_code: impl Into<String>) {
        self.reject_creates_for.insert(integration_code.into());
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn created(&self) -> &[NewLedgerEntry] {
        &self.created
    }

    pub fn current_account(&self) -> Option<ErpAccountId> {
        self.account
    }

    pub fn category_calls(&self) -> usize {
        self.category_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> i64 {
        self.entries.iter().map(|e| e.id).max().unwrap_or(0) + 1
    }
}

#[async_trait]
impl ErpClient for InMemoryErp {
    async fn set_account_id(&mut self, account: ErpAccountId) -> Result<(), ErpError> {
        self.account = Some(account);
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        account: ErpAccountId,
        range: DateRange,
    ) -> Result<Vec<LedgerEntry>, ErpError> {
        if self.offline {
            return Err(ErpError::Connectivity("in-memory ERP is offline".into()));
        }
        Ok(self
            .entries
            .iter()
            .filter(|e| e.account_id == account && range.contains(e.date))
            .cloned()
            .collect())
    }

    async fn create_ledger_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, ErpError> {
        if self.offline {
            return Err(ErpError::Timeout("in-memory ERP is offline".into()));
        }
        if self.reject_all_creates || self.reject_creates_for.contains(&entry.integration_code) {
            return Err(ErpError::Api(format!(
                "entry {} rejected",
                entry.integration_code
            )));
        }
        let stored = entry.clone().into_entry(self.next_id());
        self.entries.push(stored.clone());
        self.created.push(entry.clone());
        Ok(stored)
    }

    async fn list_categories(&self) -> Result<Vec<ErpCategory>, ErpError> {
        self.category_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(ErpError::Connectivity("in-memory ERP is offline".into()));
        }
        Ok(self.categories.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caixa_core::{LedgerStatus, Money};
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn entry(id: i64, account: i64, day: u32) -> LedgerEntry {
        LedgerEntry {
            id,
            date: d(day),
            amount: Money::from_cents(-15000),
            account_id: ErpAccountId(account),
            category: None,
            client: None,
            document_number: None,
            description: String::new(),
            status: LedgerStatus::Open,
        }
    }

    fn new_entry(code: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            account_id: ErpAccountId(1),
            date: d(10),
            amount: Money::from_cents(5000),
            category: "1.01.01".into(),
            client: None,
            description: "PIX".into(),
            document_number: code.into(),
            integration_code: code.into(),
        }
    }

    #[tokio::test]
    async fn lists_by_account_and_range() {
        let erp = InMemoryErp::new().with_entries(vec![entry(1, 1, 5), entry(2, 1, 20), entry(3, 2, 5)]);
        let found = erp
            .list_ledger_entries(ErpAccountId(1), DateRange::new(d(1), d(10)))
            .await
            .unwrap();
        assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn created_entries_get_fresh_ids() {
        let mut erp = InMemoryErp::new().with_entries(vec![entry(41, 1, 5)]);
        let created = erp.create_ledger_entry(&new_entry("A")).await.unwrap();
        assert_eq!(created.id, 42);
        assert_eq!(created.status, LedgerStatus::Reconciled);
        assert_eq!(erp.created().len(), 1);
        assert_eq!(erp.entries().len(), 2);
    }

    #[tokio::test]
    async fn failure_injection() {
        let mut erp = InMemoryErp::new();
        erp.reject_create_for("B");
        assert!(erp.create_ledger_entry(&new_entry("A")).await.is_ok());
        assert!(matches!(
            erp.create_ledger_entry(&new_entry("B")).await,
            Err(ErpError::Api(_))
        ));

        erp.set_offline(true);
        let err = erp
            .list_ledger_entries(ErpAccountId(1), DateRange::new(d(1), d(31)))
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
        assert!(erp.list_categories().await.is_err());
        assert_eq!(erp.category_calls(), 1);
    }
}
