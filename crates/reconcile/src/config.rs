use caixa_categorize::CategorizerConfig;
use caixa_core::ErpAccountId;
use caixa_erp::{OmieConfig, OMIE_BASE_URL};
use caixa_import::{AccountKind, StatementAccount};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const APP_KEY_ENV: &str = "OMIE_APP_KEY";
pub const APP_SECRET_ENV: &str = "OMIE_APP_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Missing ERP credentials: set erp.app_key/erp.app_secret or OMIE_APP_KEY/OMIE_APP_SECRET")]
    MissingCredentials,
}

/// Contents of `caixa.toml`. Every field has a default, so an empty file is a
/// valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matching: MatchingConfig,
    pub categorizer: CategorizerSettings,
    pub erp: ErpSettings,
    pub storage: StorageSettings,
    /// `[[accounts]]` entries, tried in file order.
    pub accounts: Vec<AccountMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Max date distance for an exact-amount match.
    pub date_tolerance_days: i64,
    /// Max date distance for a fuzzy match.
    pub fuzzy_window_days: i64,
    /// Absolute amount tolerance for fuzzy matches.
    pub amount_tolerance_cents: i64,
    /// Relative amount tolerance for fuzzy matches; the larger of the two wins.
    pub amount_tolerance_ratio: f64,
    pub fuzzy_threshold: f32,
    /// Minimum model confidence to create an ERP entry for an unmatched
    /// transaction.
    pub create_threshold: f32,
    /// Extra days fetched on each side of the statement period.
    pub window_margin_days: i64,
    pub dry_run: bool,
    /// Feed entries created during a run back to the categorizer.
    pub learn_from_created: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            date_tolerance_days: 1,
            fuzzy_window_days: 5,
            amount_tolerance_cents: 10,
            amount_tolerance_ratio: 0.001,
            fuzzy_threshold: 0.7,
            create_threshold: 0.7,
            window_margin_days: 7,
            dry_run: false,
            learn_from_created: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizerSettings {
    pub model_path: PathBuf,
    /// Extra keyword rules; the built-in set is used when absent.
    pub rules_path: Option<PathBuf>,
    pub min_confidence: f32,
    pub min_training_examples: u64,
    pub default_credit_category: String,
    pub default_debit_category: String,
}

impl Default for CategorizerSettings {
    fn default() -> Self {
        let defaults = CategorizerConfig::default();
        Self {
            model_path: PathBuf::from("caixa-model.json"),
            rules_path: None,
            min_confidence: defaults.min_confidence,
            min_training_examples: defaults.min_training_examples,
            default_credit_category: defaults.default_credit_category,
            default_debit_category: defaults.default_debit_category,
        }
    }
}

impl CategorizerSettings {
    pub fn categorizer_config(&self) -> CategorizerConfig {
        CategorizerConfig {
            min_confidence: self.min_confidence,
            min_training_examples: self.min_training_examples,
            default_credit_category: self.default_credit_category.clone(),
            default_debit_category: self.default_debit_category.clone(),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErpSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub category_cache_ttl_secs: i64,
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
}

impl Default for ErpSettings {
    fn default() -> Self {
        Self {
            base_url: OMIE_BASE_URL.to_string(),
            timeout_secs: 30,
            category_cache_ttl_secs: 7200,
            app_key: None,
            app_secret: None,
        }
    }
}

impl std::fmt::Debug for ErpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErpSettings")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("category_cache_ttl_secs", &self.category_cache_ttl_secs)
            .field("app_key", &self.app_key.as_ref().map(|_| "<redacted>"))
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ErpSettings {
    pub fn category_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.category_cache_ttl_secs)
    }

    pub fn omie_config(&self) -> Result<OmieConfig, ConfigError> {
        let (Some(key), Some(secret)) = (&self.app_key, &self.app_secret) else {
            return Err(ConfigError::MissingCredentials);
        };
        let mut config = OmieConfig::new(key.clone(), secret.clone());
        config.base_url = self.base_url.clone();
        config.timeout = Duration::from_secs(self.timeout_secs);
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("caixa.db"),
        }
    }
}

/// Routes statements to an ERP bank account by their `ACCTID` or kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountMapping {
    #[serde(default)]
    pub name: String,
    pub erp_account: ErpAccountId,
    /// Case-insensitive substrings of the statement's account id.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub kind: Option<AccountKind>,
}

impl AccountMapping {
    fn matches_id(&self, account_id: &str) -> bool {
        let account_id = account_id.to_lowercase();
        self.patterns
            .iter()
            .map(|p| p.trim().to_lowercase())
            .any(|p| !p.is_empty() && account_id.contains(&p))
    }
}

impl Config {
    /// ERP account for a statement: an id pattern match wins over a kind
    /// match, and earlier entries win within each.
    pub fn resolve_account(&self, account: &StatementAccount) -> Option<ErpAccountId> {
        self.accounts
            .iter()
            .find(|m| m.matches_id(&account.account_id))
            .or_else(|| self.accounts.iter().find(|m| m.kind == Some(account.kind)))
            .map(|m| m.erp_account)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads `path`, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Credentials from the environment take precedence over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(APP_KEY_ENV).filter(|v| !v.is_empty()) {
            self.erp.app_key = Some(key);
        }
        if let Some(secret) = lookup(APP_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.erp.app_secret = Some(secret);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.matching.window_margin_days, 7);
        assert_eq!(config.matching.create_threshold, 0.7);
        assert_eq!(config.categorizer.min_training_examples, 5);
        assert_eq!(config.erp.category_cache_ttl_secs, 7200);
        assert!(config.matching.learn_from_created);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
[matching]
dry_run = true
fuzzy_threshold = 0.8

[categorizer]
model_path = "/var/lib/caixa/model.json"

[erp]
app_key = "from-file"
"#,
        )
        .unwrap();
        assert!(config.matching.dry_run);
        assert_eq!(config.matching.fuzzy_threshold, 0.8);
        assert_eq!(config.matching.date_tolerance_days, 1);
        assert_eq!(config.categorizer.model_path, PathBuf::from("/var/lib/caixa/model.json"));
        assert_eq!(config.erp.app_key.as_deref(), Some("from-file"));
        assert!(matches!(config.erp.omie_config(), Err(ConfigError::MissingCredentials)));
    }

    #[test]
    fn env_overrides_credentials() {
        let mut config = Config::from_toml("[erp]\napp_key = \"from-file\"").unwrap();
        config.apply_env(|key| match key {
            APP_KEY_ENV => Some("env-key".to_string()),
            APP_SECRET_ENV => Some("env-secret".to_string()),
            _ => None,
        });
        let omie = config.erp.omie_config().unwrap();
        assert_eq!(omie.app_key, "env-key");
        assert_eq!(omie.app_secret, "env-secret");
        assert_eq!(omie.timeout, Duration::from_secs(30));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut config = Config::default();
        config.erp.app_secret = Some("s3cr3t".into());
        assert!(!format!("{config:?}").contains("s3cr3t"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caixa.toml");
        std::fs::write(&path, "[storage]\ndatabase_path = \"data/caixa.db\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.database_path, PathBuf::from("data/caixa.db"));

        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    fn statement_account(id: &str, kind: AccountKind) -> StatementAccount {
        StatementAccount {
            account_id: id.into(),
            bank_id: None,
            kind,
        }
    }

    #[test]
    fn accounts_resolve_by_id_then_kind() {
        let config = Config::from_toml(
            r#"
[[accounts]]
name = "Conta corrente"
erp_account = 8
kind = "checking"

[[accounts]]
name = "Poupança reserva"
erp_account = 12
patterns = ["98765"]

[[accounts]]
name = "Cartão"
erp_account = 9
kind = "credit_card"
"#,
        )
        .unwrap();
        assert_eq!(config.accounts.len(), 3);

        let resolve = |id: &str, kind| config.resolve_account(&statement_account(id, kind));
        assert_eq!(resolve("12345-6", AccountKind::Checking), Some(ErpAccountId(8)));
        assert_eq!(resolve("4111XXXX1111", AccountKind::CreditCard), Some(ErpAccountId(9)));
        // The id pattern beats the earlier kind entry.
        assert_eq!(resolve("0098765-1", AccountKind::Checking), Some(ErpAccountId(12)));
        assert_eq!(resolve("55555", AccountKind::Savings), None);
        assert_eq!(Config::default().resolve_account(&statement_account("1", AccountKind::Checking)), None);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(matches!(
            Config::from_toml("[matching]\ndry_run = \"yes\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
