use async_trait::async_trait;
use caixa_core::{DateRange, ErpAccountId, LedgerEntry, NewLedgerEntry};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ErpError {
    #[error("ERP unreachable: {0}")]
    Connectivity(String),
    #[error("ERP request timed out: {0}")]
    Timeout(String),
    #[error("ERP rejected the request: {0}")]
    Api(String),
    #[error("Unexpected ERP response: {0}")]
    InvalidResponse(String),
    #[error("No ERP account selected")]
    NoAccount,
}

impl ErpError {
    /// Transport-level failures, as opposed to the ERP refusing a request.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ErpError::Connectivity(_) | ErpError::Timeout(_))
    }
}

impl From<reqwest::Error> for ErpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ErpError::Timeout(e.to_string())
        } else if e.is_decode() {
            ErpError::InvalidResponse(e.to_string())
        } else if e.is_status() {
            ErpError::Api(e.to_string())
        } else {
            ErpError::Connectivity(e.to_string())
        }
    }
}

/// An ERP category as listed by the ERP: internal code plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpCategory {
    pub code: String,
    pub description: String,
}

/// The ERP operations reconciliation depends on.
#[async_trait]
pub trait ErpClient: Send + Sync {
    /// Selects the bank account subsequent calls operate on.
    async fn set_account_id(&mut self, account: ErpAccountId) -> Result<(), ErpError>;

    /// Ledger entries of `account` dated within `range`, inclusive.
    async fn list_ledger_entries(
        &self,
        account: ErpAccountId,
        range: DateRange,
    ) -> Result<Vec<LedgerEntry>, ErpError>;

    /// Creates an entry and returns it as stored, with its ERP id.
    async fn create_ledger_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, ErpError>;

    async fn list_categories(&self) -> Result<Vec<ErpCategory>, ErpError>;
}
