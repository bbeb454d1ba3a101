use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::text;
use crate::transaction::{BankTransaction, Direction, RecordError};

/// The parts of a transaction the categorizer learns from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFeatures {
    pub description: String,
    pub clean_description: String,
    pub amount: Money,
    pub direction: Direction,
}

impl TransactionFeatures {
    pub fn new(description: impl Into<String>, amount: Money) -> Self {
        let description = description.into();
        TransactionFeatures {
            clean_description: text::clean_description(&description),
            description,
            amount,
            direction: Direction::of(amount),
        }
    }

    pub fn from_transaction(tx: &BankTransaction) -> Self {
        TransactionFeatures::new(tx.description(), tx.amount())
    }
}

/// A confirmed (features, category, client) triple. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingExample {
    features: TransactionFeatures,
    confirmed_category: Option<String>,
    confirmed_client: Option<String>,
}

impl TrainingExample {
    /// Blank labels count as absent; at least one label must remain.
    pub fn new(
        features: TransactionFeatures,
        category: Option<String>,
        client: Option<String>,
    ) -> Result<Self, RecordError> {
        let confirmed_category = non_blank(category);
        let confirmed_client = non_blank(client);
        if confirmed_category.is_none() && confirmed_client.is_none() {
            return Err(RecordError::UnlabeledExample);
        }
        Ok(TrainingExample {
            features,
            confirmed_category,
            confirmed_client,
        })
    }

    pub fn features(&self) -> &TransactionFeatures {
        &self.features
    }

    pub fn category(&self) -> Option<&str> {
        self.confirmed_category.as_deref()
    }

    pub fn client(&self) -> Option<&str> {
        self.confirmed_client.as_deref()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_derive_clean_text_and_direction() {
        let f = TransactionFeatures::new("PAGTO BOLETO - Energia/SP", Money::from_cents(-8990));
        assert_eq!(f.clean_description, "pagto boleto energia sp");
        assert_eq!(f.direction, Direction::Debit);
    }

    #[test]
    fn example_requires_a_label() {
        let f = TransactionFeatures::new("x", Money::from_cents(1));
        assert_eq!(
            TrainingExample::new(f.clone(), Some("  ".into()), None),
            Err(RecordError::UnlabeledExample)
        );
        let ex = TrainingExample::new(f, None, Some(" Maria Silva ".into())).unwrap();
        assert_eq!(ex.category(), None);
        assert_eq!(ex.client(), Some("Maria Silva"));
    }
}
