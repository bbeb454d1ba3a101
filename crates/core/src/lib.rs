pub mod cache;
pub mod ledger;
pub mod matching;
pub mod money;
pub mod period;
pub mod text;
pub mod training;
pub mod transaction;

pub use cache::TtlCache;
pub use ledger::{ErpAccountId, LedgerEntry, LedgerStatus, NewLedgerEntry};
pub use matching::{MatchResult, MatchRule, MatchStatus, ReconciliationReport};
pub use money::Money;
pub use period::{days_between, DateRange};
pub use training::{TrainingExample, TransactionFeatures};
pub use transaction::{
    BankTransaction, CategorizedTransaction, Direction, Prediction, RecordError, NO_DESCRIPTION,
};
