use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;
use crate::text;
use crate::transaction::CategorizedTransaction;

/// ERP-side bank account identifier (Omie's `nCodCC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErpAccountId(pub i64);

impl fmt::Display for ErpAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Open,
    Reconciled,
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerStatus::Open => write!(f, "open"),
            LedgerStatus::Reconciled => write!(f, "reconciled"),
        }
    }
}

/// A ledger record owned by the ERP. Amount is signed: credits positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub date: NaiveDate,
    pub amount: Money,
    pub account_id: ErpAccountId,
    pub category: Option<String>,
    pub client: Option<String>,
    pub document_number: Option<String>,
    pub description: String,
    pub status: LedgerStatus,
}

impl LedgerEntry {
    /// Document number in the ERP's normalised form, if any.
    pub fn normalized_document(&self) -> Option<String> {
        self.document_number
            .as_deref()
            .map(text::normalize_document_number)
            .filter(|d| !d.is_empty())
    }

    /// Description plus client name; the ERP often keeps the counterparty
    /// only in the client field.
    pub fn searchable_text(&self) -> String {
        match &self.client {
            Some(client) => format!("{} {}", self.description, client),
            None => self.description.clone(),
        }
    }
}

/// Request to create a ledger entry for an unmatched bank transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub account_id: ErpAccountId,
    pub date: NaiveDate,
    pub amount: Money,
    pub category: String,
    pub client: Option<String>,
    pub description: String,
    /// Normalised external id, the key later runs correlate on.
    pub document_number: String,
    /// Full bank external id, kept as the ERP integration code.
    pub integration_code: String,
}

impl NewLedgerEntry {
    pub fn from_categorized(
        account_id: ErpAccountId,
        categorized: &CategorizedTransaction,
        category_code: impl Into<String>,
    ) -> Self {
        let tx = &categorized.transaction;
        NewLedgerEntry {
            account_id,
            date: tx.date(),
            amount: tx.amount(),
            category: category_code.into(),
            client: categorized.predicted_client.clone(),
            description: tx.description().to_string(),
            document_number: text::normalize_document_number(tx.external_id()),
            integration_code: tx.external_id().to_string(),
        }
    }

    /// The entry as the ERP would hold it once assigned `id`.
    pub fn into_entry(self, id: i64) -> LedgerEntry {
        LedgerEntry {
            id,
            date: self.date,
            amount: self.amount,
            account_id: self.account_id,
            category: Some(self.category),
            client: self.client,
            document_number: Some(self.document_number),
            description: self.description,
            status: LedgerStatus::Reconciled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{BankTransaction, Prediction};

    #[test]
    fn new_entry_carries_truncated_document_number() {
        let tx = BankTransaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            Money::from_cents(-15000),
            "Supplier X",
            "65f1c0d2-8a4e-4b7f-9c3d-2e1f0a9b8c7d",
        )
        .unwrap();
        let categorized = CategorizedTransaction {
            transaction: tx,
            prediction: Prediction::predicted("Fornecedores", 0.9).unwrap(),
            predicted_client: Some("Supplier X".into()),
        };

        let entry = NewLedgerEntry::from_categorized(ErpAccountId(7), &categorized, "2.01.01");
        assert_eq!(entry.document_number, "65f1c0d28a4e4b7f9c3d");
        assert_eq!(entry.integration_code, "65f1c0d2-8a4e-4b7f-9c3d-2e1f0a9b8c7d");
        assert_eq!(entry.category, "2.01.01");
        assert_eq!(entry.amount, Money::from_cents(-15000));
    }

    #[test]
    fn searchable_text_includes_client() {
        let entry = LedgerEntry {
            id: 1,
            date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            amount: Money::from_cents(100),
            account_id: ErpAccountId(7),
            category: None,
            client: Some("ACME LTDA".into()),
            document_number: Some("  ".into()),
            description: "Boleto".into(),
            status: LedgerStatus::Open,
        };
        assert_eq!(entry.searchable_text(), "Boleto ACME LTDA");
        assert_eq!(entry.normalized_document(), None);
    }
}
