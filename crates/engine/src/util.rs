//! Internal helpers for model validation and conversion.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation and mapping logic so the engine enforces consistent
//! invariants.

use uuid::Uuid;

use crate::{Currency, EngineError, ResultEngine};

/// Parse a UUID from storage and return a labeled error on failure.
pub(crate) fn parse_uuid(value: &str, label: &str) -> ResultEngine<Uuid> {
    Uuid::parse_str(value).map_err(|_| EngineError::InvalidId(format!("invalid {label} id")))
}

/// Parse a currency code stored in the DB into a strongly typed `Currency`.
pub(crate) fn model_currency(value: &str) -> ResultEngine<Currency> {
    Currency::try_from(value)
        .map_err(|_| EngineError::InvalidAmount(format!("invalid currency: {value}")))
}

/// Validates a user-facing name/description: non-empty after trimming, at
/// most `max_length` characters, and at least one alphanumeric character
/// (rejects names made only of punctuation).
pub(crate) fn validate_text(value: &str, label: &str, max_length: usize) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidName(format!(
            "{label} cannot be empty"
        )));
    }
    if trimmed.chars().count() > max_length {
        return Err(EngineError::InvalidName(format!(
            "{label} cannot exceed {max_length} characters"
        )));
    }
    if !trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(EngineError::InvalidName(format!(
            "{label} must contain at least one letter or number"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_validation_rules() {
        assert_eq!(validate_text("  Dinner ", "description", 100).unwrap(), "Dinner");
        assert!(validate_text("", "description", 100).is_err());
        assert!(validate_text("   ", "description", 100).is_err());
        assert!(validate_text("!!!", "description", 100).is_err());
        assert!(validate_text(&"x".repeat(101), "description", 100).is_err());
    }
}
