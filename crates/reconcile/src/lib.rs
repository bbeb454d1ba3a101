pub mod config;
pub mod engine;
pub mod error;
pub mod learning;
pub mod matcher;

pub use config::{
    AccountMapping, CategorizerSettings, Config, ConfigError, ErpSettings, MatchingConfig, StorageSettings,
};
pub use engine::{ReconciliationEngine, DRY_RUN_NOTE, DUPLICATE_NOTE};
pub use error::ReconcileError;
pub use learning::{dedupe_by_external_id, learn_from_history, LearningOutcome};
pub use matcher::{duplicate_positions, LedgerPool, MatchCandidate, Matcher};
