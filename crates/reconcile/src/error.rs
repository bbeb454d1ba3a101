use caixa_erp::ErpError;
use caixa_import::ParseError;
use caixa_storage::StorageError;
use thiserror::Error;

/// Failures that abort a whole run. Per-transaction ERP write failures are
/// recorded in the report instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Statement could not be parsed: {0}")]
    Parse(#[from] ParseError),
    #[error("ERP unavailable: {0}")]
    ErpConnectivity(#[from] ErpError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

