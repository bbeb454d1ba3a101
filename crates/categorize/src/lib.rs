pub mod categorizer;
pub mod model;
pub mod names;
pub mod rules;

pub use categorizer::{
    CategorizationUnavailable, Categorizer, CategorizerConfig, CategorizerStats, SaveError,
};
pub use model::{LabelModel, NaiveBayesModel};
pub use names::extract_client_name;
pub use rules::{CategoryRule, CategoryRuleEngine, MatchType, RuleError};
