use caixa_core::text::is_pix_like;
use caixa_core::{
    BankTransaction, CategorizedTransaction, Direction, Prediction, TrainingExample,
    TransactionFeatures,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{tokenize, NaiveBayesModel};
use crate::names::{extract_client_name, PIX_CLIENT};
use crate::rules::CategoryRuleEngine;

const ARTIFACT_VERSION: u32 = 1;

/// The model artifact cannot be used; callers decide whether to continue
/// with rules only.
#[derive(Debug, Error)]
pub enum CategorizationUnavailable {
    #[error("No model artifact at {}", .0.display())]
    Missing(PathBuf),
    #[error("Failed to read model artifact {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Model artifact {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Failed to write model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize model: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizerConfig {
    /// Posterior below which the model's answer is discarded.
    pub min_confidence: f32,
    /// Examples the model must have seen before it is consulted.
    pub min_training_examples: u64,
    pub default_credit_category: String,
    pub default_debit_category: String,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_training_examples: 5,
            default_credit_category: "Outras Receitas".to_string(),
            default_debit_category: "Outras Despesas".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorizerStats {
    pub examples_seen: u64,
    pub categories: usize,
    pub clients: usize,
    pub trained: bool,
}

#[derive(Serialize, Deserialize)]
struct ModelArtifact {
    version: u32,
    model: NaiveBayesModel,
}

/// Predicts category and counterparty for bank transactions.
///
/// Shared between concurrent runs behind an `Arc`: prediction takes the read
/// lock, training the write lock.
pub struct Categorizer {
    config: CategorizerConfig,
    rules: CategoryRuleEngine,
    model: RwLock<NaiveBayesModel>,
}

impl Categorizer {
    /// An untrained categorizer; every prediction is a fallback until it has
    /// seen enough examples.
    pub fn new(config: CategorizerConfig, rules: CategoryRuleEngine) -> Self {
        Self::with_model(config, rules, NaiveBayesModel::default())
    }

    pub fn with_model(
        config: CategorizerConfig,
        rules: CategoryRuleEngine,
        model: NaiveBayesModel,
    ) -> Self {
        Self {
            config,
            rules,
            model: RwLock::new(model),
        }
    }

    pub fn load(
        path: &Path,
        config: CategorizerConfig,
        rules: CategoryRuleEngine,
    ) -> Result<Self, CategorizationUnavailable> {
        let model = read_artifact(path)?;
        info!(
            path = %path.display(),
            examples = model.examples_seen,
            "Loaded categorization model"
        );
        Ok(Self::with_model(config, rules, model))
    }

    /// Like [`Categorizer::load`], but an unusable artifact only costs the
    /// model: predictions fall back to rules.
    pub fn load_or_fallback(path: &Path, config: CategorizerConfig, rules: CategoryRuleEngine) -> Self {
        match read_artifact(path) {
            Ok(model) => Self::with_model(config, rules, model),
            Err(CategorizationUnavailable::Missing(_)) => {
                info!(path = %path.display(), "No categorization model yet, starting untrained");
                Self::new(config, rules)
            }
            Err(e) => {
                warn!(error = %e, "Categorization model unavailable, using rules only");
                Self::new(config, rules)
            }
        }
    }

    /// Writes the model next to `path` and renames it into place, so readers
    /// never observe a half-written artifact.
    pub fn save(&self, path: &Path) -> Result<(), SaveError> {
        let artifact = ModelArtifact {
            version: ARTIFACT_VERSION,
            model: self.read_model().clone(),
        };
        let bytes = serde_json::to_vec(&artifact)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;

        debug!(path = %path.display(), "Saved categorization model");
        Ok(())
    }

    fn read_model(&self) -> std::sync::RwLockReadGuard<'_, NaiveBayesModel> {
        self.model.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CategorizerConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.read_model().examples_seen >= self.config.min_training_examples
    }

    pub fn predict(&self, tx: &BankTransaction) -> Prediction {
        if let Some((category, confidence)) = self.model_category(tx) {
            if let Ok(prediction) = Prediction::predicted(category, confidence) {
                return prediction;
            }
        }
        Prediction::fallback(self.fallback_category(tx))
    }

    fn model_category(&self, tx: &BankTransaction) -> Option<(String, f32)> {
        let model = self.read_model();
        if model.examples_seen < self.config.min_training_examples {
            return None;
        }
        let tokens = tokenize(&TransactionFeatures::from_transaction(tx));
        let (label, p) = model.categories.predict(&tokens)?;
        let p = p as f32;
        (p >= self.config.min_confidence).then_some((label, p))
    }

    fn fallback_category(&self, tx: &BankTransaction) -> String {
        match self.rules.find_matching_rule(tx) {
            Some(rule) => rule.category.clone(),
            None => match tx.direction() {
                Direction::Credit => self.config.default_credit_category.clone(),
                Direction::Debit => self.config.default_debit_category.clone(),
            },
        }
    }

    /// Counterparty: the model's client label when confident, else a name read
    /// from the description, else `"PIX"` for PIX transfers.
    pub fn predict_client(&self, tx: &BankTransaction) -> Option<String> {
        let from_model = {
            let model = self.read_model();
            if model.clients.documents() >= self.config.min_training_examples {
                let tokens = tokenize(&TransactionFeatures::from_transaction(tx));
                model
                    .clients
                    .predict(&tokens)
                    .filter(|(_, p)| *p as f32 >= self.config.min_confidence)
                    .map(|(label, _)| label)
            } else {
                None
            }
        };

        from_model
            .or_else(|| extract_client_name(tx.description()))
            .or_else(|| is_pix_like(tx.description()).then(|| PIX_CLIENT.to_string()))
    }

    pub fn categorize(&self, tx: BankTransaction) -> CategorizedTransaction {
        let prediction = self.predict(&tx);
        let predicted_client = self.predict_client(&tx);
        debug!(
            external_id = tx.external_id(),
            category = prediction.category(),
            confidence = prediction.confidence(),
            fallback = prediction.is_fallback(),
            "Categorized transaction"
        );
        CategorizedTransaction {
            transaction: tx,
            prediction,
            predicted_client,
        }
    }

    /// Adds examples to the model. Returns how many were learned.
    pub fn train(&self, examples: &[TrainingExample]) -> usize {
        if examples.is_empty() {
            return 0;
        }

        let mut model = self.model.write().unwrap_or_else(PoisonError::into_inner);
        for example in examples {
            let tokens = tokenize(example.features());
            if let Some(category) = example.category() {
                model.categories.observe(&tokens, category);
            }
            if let Some(client) = example.client() {
                model.clients.observe(&tokens, client);
            }
            model.examples_seen += 1;
        }

        info!(
            added = examples.len(),
            total = model.examples_seen,
            categories = model.categories.label_count(),
            clients = model.clients.label_count(),
            "Trained categorization model"
        );
        examples.len()
    }

    pub fn stats(&self) -> CategorizerStats {
        let model = self.read_model();
        CategorizerStats {
            examples_seen: model.examples_seen,
            categories: model.categories.label_count(),
            clients: model.clients.label_count(),
            trained: model.examples_seen >= self.config.min_training_examples,
        }
    }
}

fn read_artifact(path: &Path) -> Result<NaiveBayesModel, CategorizationUnavailable> {
    let bytes = std::fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            CategorizationUnavailable::Missing(path.to_path_buf())
        } else {
            CategorizationUnavailable::Unreadable {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let corrupt = |reason: String| CategorizationUnavailable::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let artifact: ModelArtifact =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if artifact.version != ARTIFACT_VERSION {
        return Err(corrupt(format!(
            "unsupported artifact version {}",
            artifact.version
        )));
    }
    Ok(artifact.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use caixa_core::Money;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn tx(desc: &str, cents: i64) -> BankTransaction {
        BankTransaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            Money::from_cents(cents),
            desc,
            "FIT1",
        )
        .unwrap()
    }

    fn example(desc: &str, cents: i64, category: &str, client: Option<&str>) -> TrainingExample {
        TrainingExample::new(
            TransactionFeatures::new(desc, Money::from_cents(cents)),
            Some(category.to_string()),
            client.map(str::to_string),
        )
        .unwrap()
    }

    fn categorizer() -> Categorizer {
        Categorizer::new(CategorizerConfig::default(), CategoryRuleEngine::builtin().unwrap())
    }

    fn training_set() -> Vec<TrainingExample> {
        vec![
            example("PAGTO FORNECEDOR ACME", -15000, "Fornecedores", Some("Acme Ltda")),
            example("PAGTO FORNECEDOR ACME", -17000, "Fornecedores", Some("Acme Ltda")),
            example("BOLETO ACME INSUMOS", -16000, "Fornecedores", Some("Acme Ltda")),
            example("PIX RECEBIDO CLIENTE BETA", 250000, "Vendas", Some("Beta Comercio")),
            example("PIX RECEBIDO CLIENTE BETA", 240000, "Vendas", Some("Beta Comercio")),
            example("TED RECEBIDA BETA", 260000, "Vendas", Some("Beta Comercio")),
        ]
    }

    #[test]
    fn untrained_model_falls_back_to_rules() {
        let c = categorizer();
        let p = c.predict(&tx("TARIFA PACOTE SERVICOS", -2990));
        assert_eq!(p, Prediction::fallback("Banco"));
    }

    #[test]
    fn unmatched_fallback_uses_direction_default() {
        let c = categorizer();
        assert_eq!(c.predict(&tx("XPTO 123", 50000)).category(), "Outras Receitas");
        assert_eq!(c.predict(&tx("XPTO 123", -50000)).category(), "Outras Despesas");
    }

    #[test]
    fn below_min_examples_model_is_ignored() {
        let c = categorizer();
        c.train(&training_set()[..4]);
        assert!(!c.is_trained());
        assert!(c.predict(&tx("PAGTO FORNECEDOR ACME", -15000)).is_fallback());
    }

    #[test]
    fn trained_model_predicts_with_confidence() {
        let c = categorizer();
        assert_eq!(c.train(&training_set()), 6);
        assert!(c.is_trained());

        let p = c.predict(&tx("PAGTO FORNECEDOR ACME", -15500));
        assert!(!p.is_fallback());
        assert_eq!(p.category(), "Fornecedores");
        assert!(p.confidence() >= 0.5);

        let categorized = c.categorize(tx("PIX RECEBIDO CLIENTE BETA", 245000));
        assert_eq!(categorized.predicted_category(), "Vendas");
        assert_eq!(categorized.predicted_client.as_deref(), Some("Beta Comercio"));
    }

    #[test]
    fn empty_training_batch_is_noop() {
        let c = categorizer();
        assert_eq!(c.train(&[]), 0);
        assert_eq!(c.stats().examples_seen, 0);
    }

    #[test]
    fn client_falls_back_to_name_extraction_then_pix() {
        let c = categorizer();
        assert_eq!(
            c.predict_client(&tx("PIX RECEBIDO - MARIA DA SILVA", 10000)).as_deref(),
            Some("Maria Da Silva")
        );
        assert_eq!(c.predict_client(&tx("PIX 12345", 10000)).as_deref(), Some(PIX_CLIENT));
        assert_eq!(c.predict_client(&tx("TARIFA", -100)), None);
    }

    #[test]
    fn stats_reflect_training() {
        let c = categorizer();
        c.train(&training_set());
        let stats = c.stats();
        assert_eq!(stats.examples_seen, 6);
        assert_eq!(stats.categories, 2);
        assert_eq!(stats.clients, 2);
        assert!(stats.trained);
    }

    #[test]
    fn save_then_load_restores_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("categorizer.json");

        let c = categorizer();
        c.train(&training_set());
        c.save(&path).unwrap();
        assert!(!dir.path().join("models").join("categorizer.json.tmp").exists());

        let loaded = Categorizer::load(
            &path,
            CategorizerConfig::default(),
            CategoryRuleEngine::builtin().unwrap(),
        )
        .unwrap();
        assert_eq!(loaded.stats(), c.stats());
        let sample = tx("BOLETO ACME INSUMOS", -16000);
        assert_eq!(loaded.predict(&sample), c.predict(&sample));
    }

    #[test]
    fn load_reports_missing_and_corrupt_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let rules = || CategoryRuleEngine::builtin().unwrap();

        assert!(matches!(
            Categorizer::load(&missing, CategorizerConfig::default(), rules()),
            Err(CategorizationUnavailable::Missing(_))
        ));

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, b"{not json").unwrap();
        assert!(matches!(
            Categorizer::load(&corrupt, CategorizerConfig::default(), rules()),
            Err(CategorizationUnavailable::Corrupt { .. })
        ));

        // The fallback constructor never fails and predicts from rules.
        let c = Categorizer::load_or_fallback(&corrupt, CategorizerConfig::default(), rules());
        assert!(c.predict(&tx("TARIFA", -2990)).is_fallback());
    }

    #[test]
    fn shared_between_threads() {
        let c = Arc::new(categorizer());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || {
                    if i == 0 {
                        c.train(&training_set());
                    }
                    c.predict(&tx("PAGTO FORNECEDOR ACME", -15000)).category().to_string()
                })
            })
            .collect();
        for handle in handles {
            let category = handle.join().unwrap();
            assert!(!category.is_empty());
        }
        assert_eq!(c.stats().examples_seen, 6);
    }
}
