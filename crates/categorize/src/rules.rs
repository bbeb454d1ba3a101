use caixa_core::text::{clean_description, fold_accents, levenshtein_distance};
use caixa_core::{BankTransaction, Direction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_RULES: &str = include_str!("default_rules.toml");

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to parse rules TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Rule '{name}' has an invalid regex: {source}")]
    Regex { name: String, source: regex::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
    pub category: String,
    /// Restricts the rule to credits or debits.
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Bounds on the absolute amount, in cents.
    #[serde(default)]
    pub amount_min_cents: Option<i64>,
    #[serde(default)]
    pub amount_max_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    Regex,
    Fuzzy {
        threshold: f32,
    },
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<CategoryRule>,
}

/// Internal pairing of a rule with its precompiled regex (if applicable).
struct CompiledRule {
    rule: CategoryRule,
    compiled_regex: Option<regex::Regex>,
}

pub struct CategoryRuleEngine {
    rules: Vec<CompiledRule>,
}

impl CategoryRuleEngine {
    pub fn new(rules: Vec<CategoryRule>) -> Result<Self, RuleError> {
        let mut compiled = rules
            .into_iter()
            .map(|rule| {
                let compiled_regex = match &rule.match_type {
                    MatchType::Regex => {
                        let pattern = format!("(?i){}", fold_accents(&rule.pattern));
                        Some(regex::Regex::new(&pattern).map_err(|source| RuleError::Regex {
                            name: rule.name.clone(),
                            source,
                        })?)
                    }
                    _ => None,
                };
                Ok(CompiledRule { rule, compiled_regex })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;
        // Highest priority first; the sort is stable so file order breaks ties.
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Ok(Self { rules: compiled })
    }

    /// Rules in the `[[rule]]` table format of `default_rules.toml`.
    pub fn from_toml(toml_content: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(toml_content)?;
        Self::new(file.rule)
    }

    /// The keyword rules shipped with the crate.
    pub fn builtin() -> Result<Self, RuleError> {
        Self::from_toml(DEFAULT_RULES)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find_matching_rule(&self, tx: &BankTransaction) -> Option<&CategoryRule> {
        let text = fold_accents(&clean_description(tx.description()));
        self.rules
            .iter()
            .find(|cr| rule_matches(cr, tx, &text))
            .map(|cr| &cr.rule)
    }
}

fn rule_matches(cr: &CompiledRule, tx: &BankTransaction, text: &str) -> bool {
    let rule = &cr.rule;

    if rule.direction.is_some_and(|d| d != tx.direction()) {
        return false;
    }

    let cents = tx.amount().abs().to_cents();
    if rule.amount_min_cents.is_some_and(|min| cents < min) {
        return false;
    }
    if rule.amount_max_cents.is_some_and(|max| cents > max) {
        return false;
    }

    let pattern = fold_accents(&rule.pattern.to_lowercase());
    match &rule.match_type {
        MatchType::Contains => text.contains(&pattern),
        MatchType::Exact => text == pattern,
        MatchType::Regex => cr
            .compiled_regex
            .as_ref()
            .is_some_and(|re| re.is_match(text)),
        MatchType::Fuzzy { threshold } => fuzzy_score(text, &pattern) >= *threshold,
    }
}

fn fuzzy_score(s1: &str, s2: &str) -> f32 {
    let max_len = s1.chars().count().max(s2.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein_distance(s1, s2) as f32 / max_len as f32)
}
