pub mod db;

pub use db::{
    create_db, insert_training_examples, learning_stats, list_runs, load_run_results,
    load_training_examples, save_run_report, statement_fingerprint, DbPool, LearningStats,
    RunRecord, RunResultRecord, StorageError,
};
