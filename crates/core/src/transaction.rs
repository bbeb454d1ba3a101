use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::money::Money;
use crate::text;

/// Stand-in description for statement entries without memo or payee.
pub const NO_DESCRIPTION: &str = "no description";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    #[error("External id must not be blank")]
    BlankExternalId,
    #[error("Confidence must be a finite number, got {0}")]
    InvalidConfidence(f32),
    #[error("Category must not be blank")]
    BlankCategory,
    #[error("Training example needs a confirmed category or client")]
    UnlabeledExample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn of(amount: Money) -> Self {
        if amount.is_negative() {
            Direction::Debit
        } else {
            Direction::Credit
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Credit => write!(f, "credit"),
            Direction::Debit => write!(f, "debit"),
        }
    }
}

/// A bank-reported movement, as parsed from a statement. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankTransaction {
    date: NaiveDate,
    amount: Money,
    description: String,
    external_id: String,
    document_number: Option<String>,
}

impl BankTransaction {
    pub fn new(
        date: NaiveDate,
        amount: Money,
        description: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Result<Self, RecordError> {
        let external_id = external_id.into().trim().to_string();
        if external_id.is_empty() {
            return Err(RecordError::BlankExternalId);
        }

        let description = description.into().trim().to_string();
        let description = if description.is_empty() {
            NO_DESCRIPTION.to_string()
        } else {
            description
        };

        Ok(BankTransaction {
            date,
            amount,
            description,
            external_id,
            document_number: None,
        })
    }

    /// Attaches a bank document number (check or reference number). Blank
    /// values are ignored.
    pub fn with_document_number(mut self, document_number: impl Into<String>) -> Self {
        let document_number = document_number.into().trim().to_string();
        self.document_number = (!document_number.is_empty()).then_some(document_number);
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn document_number(&self) -> Option<&str> {
        self.document_number.as_deref()
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.amount)
    }

    pub fn clean_description(&self) -> String {
        text::clean_description(&self.description)
    }
}

/// Outcome of categorizing a transaction. `Fallback` means the trained model
/// had nothing confident to say and a heuristic picked the category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prediction {
    Predicted { category: String, confidence: f32 },
    Fallback { category: String },
}

impl Prediction {
    pub fn predicted(category: impl Into<String>, confidence: f32) -> Result<Self, RecordError> {
        if !confidence.is_finite() {
            return Err(RecordError::InvalidConfidence(confidence));
        }
        let category = category.into();
        if category.trim().is_empty() {
            return Err(RecordError::BlankCategory);
        }
        Ok(Prediction::Predicted {
            category,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    pub fn fallback(category: impl Into<String>) -> Self {
        Prediction::Fallback {
            category: category.into(),
        }
    }

    pub fn category(&self) -> &str {
        match self {
            Prediction::Predicted { category, .. } | Prediction::Fallback { category } => category,
        }
    }

    /// Model confidence; heuristic fallbacks carry none and score 0.
    pub fn confidence(&self) -> f32 {
        match self {
            Prediction::Predicted { confidence, .. } => *confidence,
            Prediction::Fallback { .. } => 0.0,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Prediction::Fallback { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizedTransaction {
    pub transaction: BankTransaction,
    pub prediction: Prediction,
    pub predicted_client: Option<String>,
}

impl CategorizedTransaction {
    pub fn predicted_category(&self) -> &str {
        self.prediction.category()
    }

    pub fn confidence_score(&self) -> f32 {
        self.prediction.confidence()
    }
}
