//! Validated value types shared across the DPR crates.
//!
//! Everything in here is pure data: no I/O, no store access. The goal is to
//! push validation into construction so the services never juggle sentinel
//! values: a date is an [`Instant`] or it does not exist, and a payment is an
//! [`Amount`] with its unset/invalid/value states spelled out in the type.

mod amount;
mod instant;

pub use amount::Amount;
pub use instant::Instant;

use serde::{Deserialize, Serialize};

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input did not name a known enum value
    #[error("Unrecognised value: {0}")]
    Unrecognised(String),
}

/// A string type that guarantees non-empty content.
///
/// Wraps a `String` and ensures it contains at least one non-whitespace
/// character. Input is trimmed during construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Patient gender as recorded on the chart.
///
/// Unknown historical values deserialize as `Other` so old documents keep
/// loading; the dashboard buckets them separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    #[default]
    Unspecified,
    #[serde(other)]
    Other,
}

/// Payment method for a treatment, when one was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Sinpe,
    Cash,
    Transfer,
    Card,
}

impl std::str::FromStr for PaymentMethod {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sinpe" => Ok(Self::Sinpe),
            "cash" => Ok(Self::Cash),
            "transfer" => Ok(Self::Transfer),
            "card" => Ok(Self::Card),
            other => Err(TextError::Unrecognised(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_and_rejects_blank() {
        assert_eq!(NonEmptyText::new("  hola  ").unwrap().as_str(), "hola");
        assert!(matches!(NonEmptyText::new("   "), Err(TextError::Empty)));
    }

    #[test]
    fn gender_round_trips_and_tolerates_unknown_values() {
        let g: Gender = serde_json::from_str("\"female\"").unwrap();
        assert_eq!(g, Gender::Female);

        let g: Gender = serde_json::from_str("\"no especificado\"").unwrap();
        assert_eq!(g, Gender::Other);

        assert_eq!(serde_json::to_string(&Gender::Male).unwrap(), "\"male\"");
    }

    #[test]
    fn payment_method_parses_known_values_only() {
        assert_eq!("SINPE".parse::<PaymentMethod>().unwrap(), PaymentMethod::Sinpe);
        assert!("cheque".parse::<PaymentMethod>().is_err());
    }
}
